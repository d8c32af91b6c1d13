//! Request identities
//!
//! An identity is the set of fingerprint headers a request carries. Sources
//! that answer 403 get a different one on the next attempt. This lowers the
//! odds of a block; it guarantees nothing.

use crate::config::IdentityConfig;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fingerprint headers for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    /// Sent as both `X-Forwarded-For` and `X-Real-IP`
    pub forwarded_for: Option<String>,
}

impl Identity {
    /// Writes the identity into a header map, replacing earlier values
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        if let Some(ip) = &self.forwarded_for {
            if let Ok(value) = HeaderValue::from_str(ip) {
                headers.insert("x-forwarded-for", value.clone());
                headers.insert("x-real-ip", value);
            }
        }
    }
}

/// Source of identities for the fetcher
pub trait IdentityPool: Send + Sync {
    /// Identity for the first attempt of a request
    fn initial(&self) -> Identity;

    /// A fresh identity after `attempt` was blocked
    fn rotate(&self, attempt: u32) -> Identity;
}

/// Round-robin over configured user agents, with optional random client IPs
#[derive(Debug)]
pub struct RotatingIdentityPool {
    user_agents: Vec<String>,
    spoof_forwarded_for: bool,
    cursor: AtomicUsize,
}

impl RotatingIdentityPool {
    pub fn new(user_agents: Vec<String>, spoof_forwarded_for: bool) -> Self {
        Self {
            user_agents,
            spoof_forwarded_for,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(config.user_agents.clone(), config.spoof_forwarded_for)
    }

    fn next_user_agent(&self) -> String {
        if self.user_agents.is_empty() {
            return concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string();
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        self.user_agents[index].clone()
    }
}

impl IdentityPool for RotatingIdentityPool {
    fn initial(&self) -> Identity {
        Identity {
            user_agent: self.next_user_agent(),
            forwarded_for: None,
        }
    }

    fn rotate(&self, attempt: u32) -> Identity {
        let identity = Identity {
            user_agent: self.next_user_agent(),
            forwarded_for: self.spoof_forwarded_for.then(random_client_ip),
        };
        tracing::debug!(
            "Rotated identity after attempt {}: {}",
            attempt,
            identity.user_agent
        );
        identity
    }
}

/// A random public-looking IPv4 address
fn random_client_ip() -> String {
    let mut rng = rand::thread_rng();
    Ipv4Addr::new(
        rng.gen_range(1..=223),
        rng.gen_range(0..=255),
        rng.gen_range(0..=255),
        rng.gen_range(1..=254),
    )
    .to_string()
}
