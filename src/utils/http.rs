use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(60))
        .build()
        .expect("Failed to build HTTP client")
});

/// Shared client. Model calls override the request timeout per call.
pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
