#[tokio::main]
async fn main() {
    trestle::init_logging();
    trestle::run().await;
}
