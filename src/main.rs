//! cbdc-wallet-web: local wallet server binary.

#[tokio::main]
async fn main() {
    if let Err(error) = cbdc_wallet::web_client::run().await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
