use rand::Rng;

// Short alphanumeric suffix for synthetic ids (tool calls, message ids).
pub fn generate_random_id() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}
