//! Neighbour discovery.
//!
//! The initiator broadcasts [REPORT] and listens; every node running [answer_report] replies
//! [ALIVE] straight to it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use crate::message::{InboundMessage, Payload};
use crate::receiver::{Callback, Inbox, INBOX_PRIORITY_REQUEUED};
use crate::transmitter::Outbox;
use crate::LoRaAddress;

pub const REPORT: &str = "report";
pub const ALIVE: &str = "alive";

/// Priority of the discovery broadcast.
pub const DISCOVERY_PRIORITY: i32 = -1;
/// Priority of the reply, ahead of anything else pending.
pub const REPLY_PRIORITY: i32 = -9;

/// Name under which [answer_report] is registered.
pub const RESPONDER_NAME: &str = "discovery-responder";

fn is(payload: &Payload, word: &str) -> bool {
    payload.as_str() == Some(word)
}

/// Receive callback answering discovery requests. The request itself never reaches the inbox.
pub fn answer_report(message: InboundMessage, outbox: &Outbox) -> Option<InboundMessage> {
    if !is(&message.payload, REPORT) {
        return Some(message);
    }
    debug!("Discovery request from {}", message.source);
    if let Err(err) = outbox.enqueue(ALIVE, message.source, REPLY_PRIORITY, false) {
        warn!("Unable to answer discovery from {}: {}", message.source, err);
    }
    None
}

pub fn responder() -> Callback {
    Arc::new(answer_report)
}

/// Gathers the sources of [ALIVE] replies until `deadline`.
///
/// Other messages popped meanwhile are put back in the inbox once the deadline has passed.
pub fn collect_replies(inbox: &Inbox, deadline: Instant) -> BTreeSet<LoRaAddress> {
    let mut nodes = BTreeSet::new();
    let mut set_aside = Vec::new();
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match inbox.get_one(deadline - now) {
            Some(message) if is(&message.payload, ALIVE) => {
                debug!("Node {} is alive.", message.source);
                nodes.insert(message.source);
            }
            Some(message) => set_aside.push(message),
            None => {}
        }
    }
    for message in set_aside {
        inbox.push(INBOX_PRIORITY_REQUEUED, message);
    }
    nodes
}
