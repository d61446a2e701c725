use std::{collections::HashSet, net::SocketAddr};

use engine::{LinkId, ProtocolPolicy};

use crate::config::Config;

/// The default admission policy (spec section 6 "Policy surface"): refuses
/// candidates on the static deny-list, logs every neighbor loss, otherwise
/// admits anyone.
pub struct Observer {
    unwilling: HashSet<SocketAddr>,
}

impl Observer {
    pub fn new(config: &Config) -> Self {
        Self {
            unwilling: config.policy.unwilling.iter().copied().collect(),
        }
    }
}

impl ProtocolPolicy for Observer {
    fn am_willing(&self, addr: SocketAddr) -> bool {
        !self.unwilling.contains(&addr)
    }

    fn neighbor_disconnected(&self, link: LinkId) {
        log::info!("neighbor disconnected: link={}", link);
    }
}
