//! 有界动作 / 对白队列
//!
//! Core 与轮询端之间唯一的同步边界：生产速率取决于模型推理延迟，消费端按固定间隔轮询。
//! put 满则丢弃（不等待空位）；get 最多等待 timeout，超时返回 None；严格 FIFO，无优先级、无 peek。

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;

use crate::react::Action;

/// 队列统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub capacity: usize,
    pub produced: u64,
    pub consumed: u64,
    pub dropped: u64,
}

struct Inner<T> {
    items: VecDeque<T>,
    produced: u64,
    consumed: u64,
    dropped: u64,
}

/// 有界 FIFO；所有计数在同一把锁内更新
pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

/// 发往游戏客户端的动作队列
pub type ActionQueue = BoundedQueue<Action>;
/// 待朗读的对白队列
pub type DialogQueue = BoundedQueue<String>;

impl<T: fmt::Debug + Send> BoundedQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                produced: 0,
                consumed: 0,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 非阻塞入队；队列已满时计入 dropped 并返回 false
    pub fn put(&self, item: T) -> bool {
        {
            let mut inner = self.lock();
            if inner.items.len() >= self.capacity {
                inner.dropped += 1;
                tracing::warn!(queue = self.name, ?item, "Queue is full, dropping item");
                return false;
            }
            tracing::info!(queue = self.name, ?item, "Queued");
            inner.items.push_back(item);
            inner.produced += 1;
        }
        self.notify.notify_one();
        true
    }

    /// 立即出队，不等待
    pub fn try_get(&self) -> Option<T> {
        let mut inner = self.lock();
        let item = inner.items.pop_front()?;
        inner.consumed += 1;
        Some(item)
    }

    /// 最多等待 `wait`；超时返回 None，不报错
    pub async fn get(&self, wait: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_get() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::debug!(queue = self.name, "Nothing available in queue");
                return self.try_get();
            }
        }
    }

    /// 丢弃全部待处理条目，返回丢弃的条数
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let n = inner.items.len();
        inner.items.clear();
        tracing::info!(queue = self.name, cleared = n, "Queue cleared");
        n
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            size: inner.items.len(),
            capacity: self.capacity,
            produced: inner.produced,
            consumed: inner.consumed,
            dropped: inner.dropped,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }
}
