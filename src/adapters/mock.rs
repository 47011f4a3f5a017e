//! In-memory transport that replays scripted device answers.

use super::Adapter;
use crate::error::AppResult;
use std::collections::VecDeque;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Scripted transport.
///
/// Every write is recorded. A write then produces an answer from the
/// scripted queue if one is pending, otherwise from the responder closure.
/// Answers land in the receive buffer that `read` and `in_waiting` see.
#[derive(Default)]
pub struct MockAdapter {
    rx: VecDeque<u8>,
    scripted: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    written: Vec<Vec<u8>>,
}

impl MockAdapter {
    /// Empty transport that never answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every write through `responder`; `None` means silence.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    /// Queue the answer to the next unanswered write.
    pub fn queue_response(&mut self, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.scripted.push_back(bytes.into());
        self
    }

    /// Put bytes straight into the receive buffer, as line noise would.
    pub fn push_unsolicited(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// All frames written so far, oldest first.
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    /// Number of scripted answers not consumed yet.
    pub fn pending_responses(&self) -> usize {
        self.scripted.len()
    }
}

impl Adapter for MockAdapter {
    fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.written.push(bytes.to_vec());

        let answer = match self.scripted.pop_front() {
            Some(answer) => Some(answer),
            None => self.responder.as_mut().and_then(|respond| respond(bytes)),
        };
        if let Some(answer) = answer {
            self.rx.extend(answer);
        }
        Ok(())
    }

    fn read(&mut self, count: usize) -> AppResult<Vec<u8>> {
        let take = count.min(self.rx.len());
        Ok(self.rx.drain(..take).collect())
    }

    fn in_waiting(&mut self) -> AppResult<usize> {
        Ok(self.rx.len())
    }

    fn clear_internal(&mut self) -> AppResult<()> {
        self.rx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_answers_in_order() {
        let mut adapter = MockAdapter::new();
        adapter.queue_response(vec![1, 2]).queue_response(vec![3]);

        adapter.write(&[0xAA]).unwrap();
        assert_eq!(adapter.in_waiting().unwrap(), 2);
        assert_eq!(adapter.read(5).unwrap(), vec![1, 2]);

        adapter.write(&[0xBB]).unwrap();
        assert_eq!(adapter.read(1).unwrap(), vec![3]);
        assert_eq!(adapter.written().to_vec(), vec![vec![0xAAu8], vec![0xBB]]);
    }

    #[test]
    fn test_responder_and_clear() {
        let mut adapter = MockAdapter::with_responder(|frame| {
            if frame[0] == 1 {
                Some(vec![9, 9, 9])
            } else {
                None
            }
        });

        adapter.write(&[0]).unwrap();
        assert_eq!(adapter.in_waiting().unwrap(), 0);

        adapter.write(&[1]).unwrap();
        assert_eq!(adapter.in_waiting().unwrap(), 3);
        adapter.clear_internal().unwrap();
        assert_eq!(adapter.in_waiting().unwrap(), 0);
    }
}
