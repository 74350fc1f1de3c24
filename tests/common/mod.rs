#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::Arc;

use identity_gate::auth::{InMemoryRefreshTokenStore, TokenIssuer};
use identity_gate::configuration::get_configuration;
use identity_gate::coordinator::AuthCoordinator;
use identity_gate::directory::{InMemoryUserDirectory, UserDirectory};
use identity_gate::startup::run;
use serde_json::{json, Value};
use uuid::Uuid;

/// bcrypt's minimum cost keeps the suite fast.
pub const TEST_HASH_COST: u32 = 4;
pub const PASSWORD: &str = "Sw0rdFish!";

pub struct TestApp {
    pub address: String,
    pub directory: Arc<InMemoryUserDirectory>,
    pub client: reqwest::Client,
}

pub fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let configuration = get_configuration().expect("Failed to read configuration.");
    let directory = Arc::new(InMemoryUserDirectory::new(TEST_HASH_COST));
    let coordinator = AuthCoordinator::new(
        directory.clone(),
        Arc::new(InMemoryRefreshTokenStore::new(
            configuration.jwt.refresh_token_lifetime(),
        )),
        Arc::new(TokenIssuer::new(&configuration.jwt)),
        configuration.application.store_timeout(),
    );

    let server = run(listener, coordinator).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        directory,
        client: reqwest::Client::new(),
    }
}

pub fn registration(username: &str, email: &str) -> Value {
    json!({
        "username": username,
        "email": email,
        "password": PASSWORD,
        "confirmPassword": PASSWORD,
        "firstName": "Test",
        "lastName": "User"
    })
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn register(&self, username: &str, email: &str) -> reqwest::Response {
        self.post_json("/register", &registration(username, email))
            .await
    }

    pub async fn login(&self, identifier: &str, password: &str) -> reqwest::Response {
        self.post_json(
            "/login",
            &json!({ "usernameOrEmail": identifier, "password": password }),
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> reqwest::Response {
        self.post_json("/refresh-token", &json!({ "refreshToken": refresh_token }))
            .await
    }

    /// Register a user and return the session body.
    pub async fn register_ok(&self, username: &str) -> Value {
        let response = self
            .register(username, &format!("{}@example.com", username))
            .await;
        assert_eq!(200, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    pub async fn make_admin(&self, user_id: &str) {
        let user_id = Uuid::parse_str(user_id).expect("user id is a uuid");
        self.directory
            .assign_role(user_id, "Admin")
            .await
            .expect("Failed to assign admin role");
    }
}
