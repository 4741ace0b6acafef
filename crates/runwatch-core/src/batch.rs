use crate::record::LineRecord;
use crate::transport::LineReceiver;
use tokio::sync::mpsc::error::TryRecvError;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 25;

#[derive(Debug, Default)]
pub struct Batch {
    pub lines: Vec<LineRecord>,
    pub closed: bool,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Waits for the first record, then drains whatever is immediately available
/// up to `max_batch_size` records in total.
pub async fn read_batch(receiver: &mut LineReceiver, max_batch_size: usize) -> Batch {
    let limit = max_batch_size.max(1);
    let Some(first) = receiver.recv().await else {
        return Batch {
            lines: Vec::new(),
            closed: true,
        };
    };

    let mut lines = Vec::with_capacity(limit);
    lines.push(first);
    let mut closed = false;
    while lines.len() < limit {
        match receiver.try_recv() {
            Ok(record) => lines.push(record),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                closed = true;
                break;
            }
        }
    }

    Batch { lines, closed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::transport_queue;

    fn texts(batch: &Batch) -> Vec<String> {
        batch.lines.iter().map(|record| record.text.clone()).collect()
    }

    #[tokio::test]
    async fn closed_before_any_data_yields_empty_closed_batch() {
        let (tx, mut rx) = transport_queue(4);
        tx.close();
        let batch = read_batch(&mut rx, 25).await;
        assert!(batch.is_empty());
        assert!(batch.closed);
    }

    #[tokio::test]
    async fn drains_up_to_limit_then_continues_in_order() {
        let (tx, mut rx) = transport_queue(64);
        for i in 0..60 {
            tx.push(LineRecord::new(i.to_string())).await.expect("push");
        }

        let mut seen = Vec::new();
        let first = read_batch(&mut rx, 25).await;
        assert_eq!(first.lines.len(), 25);
        assert!(!first.closed);
        seen.extend(texts(&first));

        let second = read_batch(&mut rx, 25).await;
        assert_eq!(second.lines.len(), 25);
        seen.extend(texts(&second));

        let third = read_batch(&mut rx, 25).await;
        assert_eq!(third.lines.len(), 10);
        assert!(!third.closed);
        seen.extend(texts(&third));

        let expected: Vec<String> = (0..60).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn reports_closure_observed_mid_drain() {
        let (tx, mut rx) = transport_queue(8);
        for i in 0..3 {
            tx.push(LineRecord::new(i.to_string())).await.expect("push");
        }
        tx.close();

        let batch = read_batch(&mut rx, 25).await;
        assert_eq!(texts(&batch), vec!["0", "1", "2"]);
        assert!(batch.closed);
    }

    #[tokio::test]
    async fn closure_reported_on_exhausting_call() {
        let (tx, mut rx) = transport_queue(8);
        for i in 0..4 {
            tx.push(LineRecord::new(i.to_string())).await.expect("push");
        }
        tx.close();

        let first = read_batch(&mut rx, 2).await;
        assert_eq!(texts(&first), vec!["0", "1"]);
        assert!(!first.closed);
        let second = read_batch(&mut rx, 2).await;
        assert_eq!(texts(&second), vec!["2", "3"]);
        let third = read_batch(&mut rx, 2).await;
        assert!(third.is_empty());
        assert!(third.closed);
    }

    #[tokio::test]
    async fn waits_for_first_line() {
        let (tx, mut rx) = transport_queue(8);
        let producer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tx.push(LineRecord::new("late")).await.expect("push");
        });
        let batch = read_batch(&mut rx, 25).await;
        assert_eq!(texts(&batch), vec!["late"]);
        producer.await.expect("producer");
    }

    #[tokio::test]
    async fn zero_limit_still_returns_one_line() {
        let (tx, mut rx) = transport_queue(8);
        tx.push(LineRecord::new("a")).await.expect("push");
        tx.push(LineRecord::new("b")).await.expect("push");
        let batch = read_batch(&mut rx, 0).await;
        assert_eq!(texts(&batch), vec!["a"]);
    }
}
