#[tokio::main]
async fn main() {
    fluxflow::start(std::env::args()).await;
}
