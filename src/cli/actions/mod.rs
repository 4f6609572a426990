pub mod server;

use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        redis_url: Option<String>,
        jwt_secret: SecretString,
        frontend_url: String,
    },
}
