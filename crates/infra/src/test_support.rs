//! Fixtures shared by the unit tests of this crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{Acknowledge, BrokerError, BrokerTopology, ExchangeSpec, InboundDelivery, QueueSpec};

pub(crate) fn topology() -> BrokerTopology {
    BrokerTopology {
        uri: "amqp://memory".to_string(),
        exchange: ExchangeSpec {
            name: "jobs".to_string(),
            kind: "topic".to_string(),
            durable: true,
            auto_delete: false,
            internal: false,
            no_wait: false,
        },
        queue: QueueSpec {
            name: "jex_events".to_string(),
            durable: true,
            auto_delete: false,
            exclusive: false,
            no_wait: false,
        },
        binding_key: "events.#".to_string(),
        consumer_tag: "jex-events".to_string(),
    }
}

/// JSON message body as published by the log shipper.
pub(crate) fn body(text: &str, hash: &str) -> Vec<u8> {
    serde_json::json!({ "Event": text, "Hash": hash })
        .to_string()
        .into_bytes()
}

pub(crate) fn terminated(cluster: u32, exit_code: i32) -> String {
    format!(
        "005 ({cluster:03}.000.000) 10/21 12:00:00 Job terminated.\n\t(1) Normal termination (return value {exit_code})\n"
    )
}

pub(crate) fn executing(cluster: u32) -> String {
    format!("001 ({cluster:03}.000.000) 10/21 11:59:00 Job executing on host: <10.0.0.1:9618>\n")
}

/// Records acks; optionally fails them.
#[derive(Clone, Default)]
pub(crate) struct TestAcker {
    pub(crate) acked: Arc<Mutex<Vec<u64>>>,
    pub(crate) fail: bool,
}

pub(crate) struct TaggedAcker {
    tag: u64,
    inner: TestAcker,
}

#[async_trait]
impl Acknowledge for TaggedAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        if self.inner.fail {
            return Err(BrokerError::Ack {
                delivery_tag: self.tag,
                reason: "channel closed".to_string(),
            });
        }
        self.inner.acked.lock().unwrap().push(self.tag);
        Ok(())
    }
}

impl TestAcker {
    pub(crate) fn delivery(&self, tag: u64, body: Vec<u8>) -> InboundDelivery {
        InboundDelivery::new(
            tag,
            body,
            TaggedAcker {
                tag,
                inner: self.clone(),
            },
        )
    }

    pub(crate) fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub(crate) async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
