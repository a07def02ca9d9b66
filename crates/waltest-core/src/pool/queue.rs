//! JobQueue - ワーカーが取り出す FIFO キュー
//!
//! # 実装詳細
//! - Mutex<VecDeque> で排他制御、Condvar で push 時に通知
//! - 上限なし（submit は拒否もドロップもしない）
//! - close() 後の pop は None、残っていたジョブは呼び出し側へ返す

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct QueueState<J> {
    jobs: VecDeque<J>,
    closed: bool,
}

pub(crate) struct JobQueue<J> {
    state: Mutex<QueueState<J>>,
    available: Condvar,
}

impl<J> JobQueue<J> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append a job. Returns it back if the queue is already closed.
    pub(crate) fn push(&self, job: J) -> Result<(), J> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(job);
        }
        state.jobs.push_back(job);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Block until a job is available; `None` once the queue is closed.
    pub(crate) fn pop(&self) -> Option<J> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            self.available.wait(&mut state);
        }
    }

    /// Close the queue, wake every idle worker and hand back undispatched jobs.
    pub(crate) fn close(&self) -> Vec<J> {
        let mut state = self.state.lock();
        state.closed = true;
        let drained = state.jobs.drain(..).collect();
        drop(state);
        self.available.notify_all();
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }
}
