//! Send-completion callbacks.
//!
//! Every queued unit may carry a callback that runs once its last byte has
//! been written to the socket. The callbacks collected while filling one
//! packet are fired together, after the write, outside every lock.

/// Callback run when a queued unit has been written.
pub type Completion = Box<dyn FnOnce() + Send>;

/// Completions gathered while draining one packet.
#[derive(Default)]
pub struct Completions {
    pending: Vec<Completion>,
}

impl Completions {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a completion.
    pub fn push(&mut self, completion: Completion) {
        self.pending.push(completion);
    }

    /// Number of completions held.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no completions are held.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Run every completion in the order they were gathered.
    pub fn fire(self) {
        for completion in self.pending {
            completion();
        }
    }
}

impl std::fmt::Debug for Completions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completions")
            .field("len", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_fire_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut completions = Completions::new();
        for i in 0..3 {
            let log = log.clone();
            completions.push(Box::new(move || log.lock().unwrap().push(i)));
        }
        assert_eq!(completions.len(), 3);
        completions.fire();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }
}
