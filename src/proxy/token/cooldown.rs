use dashmap::DashMap;

// Wall-clock exclusion windows per account, in unix milliseconds.
pub struct CooldownTracker {
    entries: DashMap<String, i64>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn set(&self, account_id: &str, duration_ms: i64) {
        let until = chrono::Utc::now().timestamp_millis() + duration_ms;
        self.entries.insert(account_id.to_string(), until);
    }

    pub fn is_cooled(&self, account_id: &str, now_ms: i64) -> bool {
        self.entries
            .get(account_id)
            .map(|until| *until > now_ms)
            .unwrap_or(false)
    }

    pub fn remaining_ms(&self, account_id: &str) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.entries
            .get(account_id)
            .map(|until| (*until - now).max(0))
            .unwrap_or(0)
    }

    pub fn clear(&self, account_id: &str) -> bool {
        self.entries.remove(account_id).is_some()
    }

    pub fn cleanup_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp_millis();
        let before = self.entries.len();
        self.entries.retain(|_, until| *until > now);
        before - self.entries.len()
    }

    #[cfg(test)]
    pub fn set_until(&self, account_id: &str, until_ms: i64) {
        self.entries.insert(account_id.to_string(), until_ms);
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new()
    }
}
