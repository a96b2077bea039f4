//! Mock Pipeline Integration Tests
//!
//! Drives the full dispatch loop with a channel-fed source and a mocked sink
//! (no external dependencies). Verifies source → decode → sink works correctly.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use mockall::mock;

use txstream_decoder::decoder::{DecodeError, DecodedTransaction};
use txstream_decoder::publisher::{ChannelSink, RecordSink, SinkError};
use txstream_decoder::source::{ChannelSource, SourceError, StreamSource};
use txstream_decoder::update::{
    CompiledInstruction, Message, MessageHeader, SubscribeUpdate, TransactionInfo, TransactionMeta,
    TransactionUpdate,
};
use txstream_decoder::{Pipeline, PipelineStats};

mock! {
    Sink {}

    impl RecordSink for Sink {
        fn deliver(&self, decoded: DecodedTransaction) -> Result<(), SinkError>;
        fn rejected(&self, error: &DecodeError) -> Result<(), SinkError>;
    }
}

/// Sink capturing records and rejections, optionally failing the first deliveries
#[derive(Default)]
struct CapturingSink {
    records: Mutex<Vec<DecodedTransaction>>,
    rejections: Mutex<Vec<DecodeError>>,
    fail_next: Mutex<usize>,
}

impl CapturingSink {
    fn failing(count: usize) -> Self {
        Self {
            fail_next: Mutex::new(count),
            ..Default::default()
        }
    }

    fn slots(&self) -> Vec<u64> {
        self.records.lock().unwrap().iter().map(|d| d.record.slot).collect()
    }
}

impl RecordSink for CapturingSink {
    fn deliver(&self, decoded: DecodedTransaction) -> Result<(), SinkError> {
        let mut fail_count = self.fail_next.lock().unwrap();
        if *fail_count > 0 {
            *fail_count -= 1;
            return Err(SinkError::Closed);
        }
        self.records.lock().unwrap().push(decoded);
        Ok(())
    }

    fn rejected(&self, error: &DecodeError) -> Result<(), SinkError> {
        self.rejections.lock().unwrap().push(error.clone());
        Ok(())
    }
}

fn key(byte: u8) -> Vec<u8> {
    vec![byte; 32]
}

/// Transfer-like transaction: payer, recipient, system program
fn transfer_update(slot: u64) -> SubscribeUpdate {
    SubscribeUpdate::transaction(TransactionUpdate {
        slot,
        transaction: Some(TransactionInfo {
            signature: slot.to_le_bytes().repeat(8),
            message: Some(Message {
                header: MessageHeader {
                    num_required_signatures: 1,
                    num_readonly_signed_accounts: 0,
                    num_readonly_unsigned_accounts: 1,
                },
                account_keys: vec![key(1), key(2), vec![0; 32]],
                instructions: vec![CompiledInstruction {
                    program_id_index: 2,
                    accounts: vec![0, 1],
                    data: vec![2, 0, 0, 0, 64, 66, 15, 0, 0, 0, 0, 0],
                }],
            }),
            meta: Some(TransactionMeta {
                compute_units_consumed: Some(150),
                log_messages: vec![
                    "Program 11111111111111111111111111111111 invoke [1]".to_string(),
                    "Program 11111111111111111111111111111111 success".to_string(),
                ],
                pre_balances: vec![2_000_000, 0, 1],
                post_balances: vec![995_000, 1_000_000, 1],
                ..Default::default()
            }),
        }),
    })
}

fn broken_update(slot: u64) -> SubscribeUpdate {
    SubscribeUpdate::transaction(TransactionUpdate { slot, transaction: None })
}

async fn feed(updates: Vec<SubscribeUpdate>) -> ChannelSource {
    let (sender, source) = ChannelSource::channel(updates.len().max(1));
    for update in updates {
        sender.send(Ok(update)).await.unwrap();
    }
    source
}

// ==================== Basic Pipeline Tests ====================

#[tokio::test]
async fn test_pipeline_delivers_decoded_transaction() {
    let mut sink = MockSink::new();
    sink.expect_deliver()
        .withf(|decoded| {
            let record = &decoded.record;
            record.slot == 10
                && record.instructions.len() == 1
                && record.balance_changes.len() == 3
                && record.compute_units_consumed == 150
                && decoded.is_clean()
        })
        .times(1)
        .returning(|_| Ok(()));
    sink.expect_rejected().never();

    let pipeline = Pipeline::new(sink);
    let stats = pipeline.run(feed(vec![transfer_update(10)]).await).await.unwrap();

    assert_eq!(stats.decoded, 1);
    assert_eq!(stats.received, 1);
}

#[tokio::test]
async fn test_pipeline_skips_heartbeats_silently() {
    let mut sink = MockSink::new();
    sink.expect_deliver().never();
    sink.expect_rejected().never();

    let mut heartbeat = transfer_update(11);
    if let Some(txstream_decoder::update::UpdateKind::Transaction(tx)) = heartbeat.update.as_mut() {
        tx.transaction.as_mut().unwrap().signature.clear();
    }

    let pipeline = Pipeline::new(sink);
    let stats = pipeline
        .run(feed(vec![SubscribeUpdate::ping(), heartbeat, SubscribeUpdate::default()]).await)
        .await
        .unwrap();

    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.decoded, 0);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_pipeline_reports_missing_transaction() {
    let mut sink = MockSink::new();
    sink.expect_deliver().times(1).returning(|_| Ok(()));
    sink.expect_rejected()
        .withf(|error: &DecodeError| matches!(error, DecodeError::MissingTransaction { slot: 20, .. }))
        .times(1)
        .returning(|_| Ok(()));

    let pipeline = Pipeline::new(sink);
    let stats = pipeline
        .run(feed(vec![broken_update(20), transfer_update(21)]).await)
        .await
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.decoded, 1);
}

// ==================== Isolation Tests ====================

#[tokio::test]
async fn test_malformed_update_does_not_affect_others() {
    let sink = Arc::new(CapturingSink::default());
    let pipeline = Pipeline::with_shared_sink(Arc::clone(&sink));

    let mut bad_index = transfer_update(31);
    if let Some(txstream_decoder::update::UpdateKind::Transaction(tx)) = bad_index.update.as_mut() {
        let message = tx.transaction.as_mut().unwrap().message.as_mut().unwrap();
        message.instructions[0].program_id_index = 200;
    }

    let stats = pipeline
        .run(feed(vec![transfer_update(30), bad_index, broken_update(32), transfer_update(33)]).await)
        .await
        .unwrap();

    assert_eq!(
        stats,
        PipelineStats {
            received: 4,
            decoded: 3,
            skipped: 0,
            failed: 1,
            warnings: 1,
            delivery_failures: 0,
        }
    );

    let rejections = sink.rejections.lock().unwrap();
    assert!(matches!(
        rejections.as_slice(),
        [DecodeError::MissingTransaction { slot: 32, .. }]
    ));

    let records = sink.records.lock().unwrap();
    for decoded in records.iter() {
        match decoded.record.slot {
            31 => assert!(decoded.record.instructions.is_empty()),
            _ => assert_eq!(decoded.record.instructions.len(), 1),
        }
        assert_eq!(decoded.record.balance_changes.len(), 3);
    }
}

#[tokio::test]
async fn test_every_update_is_delivered_in_some_order() {
    let sink = Arc::new(CapturingSink::default());
    let pipeline = Pipeline::with_shared_sink(Arc::clone(&sink));

    let updates: Vec<SubscribeUpdate> = (1..=50).map(transfer_update).collect();
    pipeline.run(feed(updates).await).await.unwrap();

    let mut slots = sink.slots();
    slots.sort_unstable();
    assert_eq!(slots, (1..=50).collect::<Vec<u64>>());
}

// ==================== Error Recovery Tests ====================

#[tokio::test]
async fn test_pipeline_continues_after_delivery_failures() {
    let sink = Arc::new(CapturingSink::failing(2));
    let pipeline = Pipeline::with_shared_sink(Arc::clone(&sink));

    let updates: Vec<SubscribeUpdate> = (1..=5).map(transfer_update).collect();
    let stats = pipeline.run(feed(updates).await).await.unwrap();

    assert_eq!(stats.decoded, 5);
    assert_eq!(stats.delivery_failures, 2);
    assert_eq!(sink.slots().len(), 3);
}

#[tokio::test]
async fn test_stream_failure_ends_the_run() {
    let items: Vec<Result<SubscribeUpdate, String>> = vec![
        Ok(transfer_update(1)),
        Err("transport closed".to_string()),
        Ok(transfer_update(2)),
    ];
    let sink = Arc::new(CapturingSink::default());
    let pipeline = Pipeline::with_shared_sink(Arc::clone(&sink));

    let result = pipeline.run(StreamSource::new(tokio_stream::iter(items))).await;

    assert_eq!(result, Err(SourceError::Transport("transport closed".to_string())));
    assert_eq!(sink.slots(), vec![1]);
}

// ==================== Channel Sink Tests ====================

#[tokio::test]
async fn test_channel_sink_feeds_consumer() {
    let (sink, mut receiver) = ChannelSink::channel();
    let pipeline = Pipeline::new(sink);

    let updates: Vec<SubscribeUpdate> = (1..=3).map(transfer_update).collect();
    pipeline.run(feed(updates).await).await.unwrap();

    let mut slots = Vec::new();
    while let Ok(item) = receiver.try_recv() {
        slots.push(item.unwrap().record.slot);
    }
    slots.sort_unstable();
    assert_eq!(slots, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_channel_sink_consumer_sees_missing_transaction() {
    let (sink, mut receiver) = ChannelSink::channel();
    let pipeline = Pipeline::new(sink);

    let stats = pipeline.run(feed(vec![broken_update(50)]).await).await.unwrap();
    assert_eq!(stats.failed, 1);

    let item = receiver.try_recv().expect("consumer must receive the failure");
    assert_eq!(
        item,
        Err(DecodeError::MissingTransaction {
            slot: 50,
            missing: "transaction"
        })
    );
    assert!(receiver.try_recv().is_err());
}

// ==================== High Volume Tests ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipeline_handles_1000_updates() {
    let sink = Arc::new(CapturingSink::default());
    let pipeline = Pipeline::with_shared_sink(Arc::clone(&sink));

    let (sender, source) = ChannelSource::channel(64);
    let producer = tokio::spawn(async move {
        for slot in 0..1000u64 {
            let update = if slot % 10 == 0 {
                SubscribeUpdate::ping()
            } else {
                transfer_update(slot)
            };
            sender.send(Ok(update)).await.unwrap();
        }
    });

    let start = Instant::now();
    let stats = pipeline.run(source).await.unwrap();
    let duration = start.elapsed();
    producer.await.unwrap();

    assert_eq!(stats.received, 1000);
    assert_eq!(stats.skipped, 100);
    assert_eq!(stats.decoded, 900);
    assert_eq!(sink.slots().len(), 900);

    // Should complete in reasonable time
    assert!(duration.as_secs() < 5, "Processing took too long: {:?}", duration);
}
