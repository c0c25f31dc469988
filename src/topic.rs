// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fixed family of shadow topics for one device.
//!
//! For a device named `D` the contract owns eleven strings under the
//! `baidu/iot/shadow` prefix:
//!
//! ```text
//! send:   .../D/update   .../D/get   .../D/delete
//! reply:  .../D/update/{accepted,rejected}
//!         .../D/get/{accepted,rejected}
//!         .../D/delete/{accepted,rejected}
//! delta:  .../D/delta    .../D/delta/rejected
//! ```
//!
//! The subscribe set is every reply topic plus `delta` (seven filters);
//! `delta/rejected` is publish-only. Incoming topics are classified by an
//! exact whole-string comparison, ignoring ASCII case — no MQTT wildcards
//! are involved.

use crate::types::{AckStatus, ShadowAction};

/// Topic namespace all shadow traffic lives under.
pub const TOPIC_PREFIX: &str = "baidu/iot/shadow";

/// Number of topics in the subscribe set.
pub const SUBSCRIBE_TOPIC_COUNT: usize = 7;

/// Classification of an incoming message topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// An accepted/rejected reply to a shadow request.
    Reply {
        /// The action the reply topic belongs to.
        action: ShadowAction,
        /// Accepted or rejected, derived from the topic suffix.
        status: AckStatus,
    },
    /// A server-originated delta message.
    Delta,
}

/// The precomputed set of topic strings for one device.
///
/// Built once at client creation so no topic is composed on the hot path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicContract {
    update: String,
    update_accepted: String,
    update_rejected: String,
    get: String,
    get_accepted: String,
    get_rejected: String,
    delete: String,
    delete_accepted: String,
    delete_rejected: String,
    delta: String,
    delta_rejected: String,
}

impl TopicContract {
    /// Computes the eleven topic strings for `device_name`.
    #[must_use]
    pub fn new(device_name: &str) -> Self {
        let base = format!("{TOPIC_PREFIX}/{device_name}");
        Self {
            update: format!("{base}/update"),
            update_accepted: format!("{base}/update/accepted"),
            update_rejected: format!("{base}/update/rejected"),
            get: format!("{base}/get"),
            get_accepted: format!("{base}/get/accepted"),
            get_rejected: format!("{base}/get/rejected"),
            delete: format!("{base}/delete"),
            delete_accepted: format!("{base}/delete/accepted"),
            delete_rejected: format!("{base}/delete/rejected"),
            delta: format!("{base}/delta"),
            delta_rejected: format!("{base}/delta/rejected"),
        }
    }

    /// Returns the send topic for `action`.
    #[must_use]
    pub fn send_topic(&self, action: ShadowAction) -> &str {
        match action {
            ShadowAction::Update => &self.update,
            ShadowAction::Get => &self.get,
            ShadowAction::Delete => &self.delete,
        }
    }

    /// Returns the delta topic.
    #[must_use]
    pub fn delta(&self) -> &str {
        &self.delta
    }

    /// Returns the topic the client publishes delta rejections to.
    #[must_use]
    pub fn delta_rejected(&self) -> &str {
        &self.delta_rejected
    }

    /// Returns the topics to subscribe to after every (re)connect: the six
    /// reply topics plus `delta`, in a fixed order suitable for a single
    /// subscribe-many call.
    #[must_use]
    pub fn subscribe_set(&self) -> [&str; SUBSCRIBE_TOPIC_COUNT] {
        [
            &self.update_accepted,
            &self.update_rejected,
            &self.get_accepted,
            &self.get_rejected,
            &self.delete_accepted,
            &self.delete_rejected,
            &self.delta,
        ]
    }

    /// Classifies an incoming topic.
    ///
    /// The comparison covers the entire topic string and ignores ASCII
    /// case; anything that is not exactly one of the seven inbound topics
    /// yields `None`.
    pub(crate) fn classify(&self, topic: &str) -> Option<Inbound> {
        use AckStatus::{Accepted, Rejected};
        use ShadowAction::{Delete, Get, Update};

        let table: [(&str, Inbound); SUBSCRIBE_TOPIC_COUNT] = [
            (
                &self.update_accepted,
                Inbound::Reply {
                    action: Update,
                    status: Accepted,
                },
            ),
            (
                &self.update_rejected,
                Inbound::Reply {
                    action: Update,
                    status: Rejected,
                },
            ),
            (
                &self.get_accepted,
                Inbound::Reply {
                    action: Get,
                    status: Accepted,
                },
            ),
            (
                &self.get_rejected,
                Inbound::Reply {
                    action: Get,
                    status: Rejected,
                },
            ),
            (
                &self.delete_accepted,
                Inbound::Reply {
                    action: Delete,
                    status: Accepted,
                },
            ),
            (
                &self.delete_rejected,
                Inbound::Reply {
                    action: Delete,
                    status: Rejected,
                },
            ),
            (&self.delta, Inbound::Delta),
        ];

        table
            .into_iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(topic))
            .map(|(_, inbound)| inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_topic_strings() {
        let contract = TopicContract::new("dev1");
        assert_eq!(
            contract.send_topic(ShadowAction::Update),
            "baidu/iot/shadow/dev1/update"
        );
        assert_eq!(
            contract.send_topic(ShadowAction::Get),
            "baidu/iot/shadow/dev1/get"
        );
        assert_eq!(
            contract.send_topic(ShadowAction::Delete),
            "baidu/iot/shadow/dev1/delete"
        );
        assert_eq!(contract.delta(), "baidu/iot/shadow/dev1/delta");
        assert_eq!(
            contract.delta_rejected(),
            "baidu/iot/shadow/dev1/delta/rejected"
        );
    }

    #[test]
    fn subscribe_set_covers_replies_and_delta() {
        let contract = TopicContract::new("dev1");
        let set = contract.subscribe_set();
        assert_eq!(set.len(), 7);
        assert!(set.contains(&"baidu/iot/shadow/dev1/update/accepted"));
        assert!(set.contains(&"baidu/iot/shadow/dev1/update/rejected"));
        assert!(set.contains(&"baidu/iot/shadow/dev1/get/accepted"));
        assert!(set.contains(&"baidu/iot/shadow/dev1/get/rejected"));
        assert!(set.contains(&"baidu/iot/shadow/dev1/delete/accepted"));
        assert!(set.contains(&"baidu/iot/shadow/dev1/delete/rejected"));
        assert!(set.contains(&"baidu/iot/shadow/dev1/delta"));
        // Publish-only topics never appear in the subscribe set.
        assert!(!set.contains(&"baidu/iot/shadow/dev1/delta/rejected"));
        assert!(!set.contains(&"baidu/iot/shadow/dev1/update"));
    }

    #[test]
    fn contracts_differ_per_device() {
        let a = TopicContract::new("dev1");
        let b = TopicContract::new("dev2");
        for (ta, tb) in a.subscribe_set().iter().zip(b.subscribe_set()) {
            assert_ne!(*ta, tb);
        }
        assert_ne!(a.send_topic(ShadowAction::Update), b.send_topic(ShadowAction::Update));
        assert_ne!(a.delta_rejected(), b.delta_rejected());
    }

    #[test]
    fn classify_reply_topics() {
        let contract = TopicContract::new("dev1");
        assert_eq!(
            contract.classify("baidu/iot/shadow/dev1/update/accepted"),
            Some(Inbound::Reply {
                action: ShadowAction::Update,
                status: AckStatus::Accepted,
            })
        );
        assert_eq!(
            contract.classify("baidu/iot/shadow/dev1/get/rejected"),
            Some(Inbound::Reply {
                action: ShadowAction::Get,
                status: AckStatus::Rejected,
            })
        );
        assert_eq!(
            contract.classify("baidu/iot/shadow/dev1/delete/accepted"),
            Some(Inbound::Reply {
                action: ShadowAction::Delete,
                status: AckStatus::Accepted,
            })
        );
    }

    #[test]
    fn classify_delta() {
        let contract = TopicContract::new("dev1");
        assert_eq!(
            contract.classify("baidu/iot/shadow/dev1/delta"),
            Some(Inbound::Delta)
        );
    }

    #[test]
    fn classify_ignores_ascii_case() {
        let contract = TopicContract::new("dev1");
        assert_eq!(
            contract.classify("BAIDU/IOT/SHADOW/DEV1/UPDATE/ACCEPTED"),
            Some(Inbound::Reply {
                action: ShadowAction::Update,
                status: AckStatus::Accepted,
            })
        );
    }

    #[test]
    fn classify_requires_full_match() {
        let contract = TopicContract::new("dev1");
        // A prefix of a known topic is not a match.
        assert_eq!(contract.classify("baidu/iot/shadow/dev1/update"), None);
        // An extension of a known topic is not a match either.
        assert_eq!(
            contract.classify("baidu/iot/shadow/dev1/update/accepted/extra"),
            None
        );
        assert_eq!(contract.classify("baidu/iot/shadow/dev10/delta"), None);
        assert_eq!(contract.classify("unrelated/topic"), None);
    }

    #[test]
    fn classify_delta_rejected_is_not_inbound() {
        let contract = TopicContract::new("dev1");
        assert_eq!(contract.classify("baidu/iot/shadow/dev1/delta/rejected"), None);
    }
}
