use crate::error::{CallError, Result};
use crate::peer::types::{CallRecord, IceCandidate, SdpType, SessionDescription};
use crate::signaling::{CandidateFeed, SignalingStore, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct CallEntry {
    record: Option<CallRecord>,
    watchers: Vec<mpsc::UnboundedSender<CallRecord>>,
}

impl CallEntry {
    fn notify(&mut self) {
        if let Some(record) = &self.record {
            self.watchers.retain(|tx| tx.send(record.clone()).is_ok());
        }
    }

    fn is_ended(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.ended)
    }
}

#[derive(Default)]
struct FeedEntry {
    candidates: Vec<IceCandidate>,
    watchers: Vec<mpsc::UnboundedSender<IceCandidate>>,
}

#[derive(Default)]
struct Inner {
    calls: HashMap<String, CallEntry>,
    feeds: HashMap<(String, String), FeedEntry>,
}

impl Inner {
    /// Убирает закрытых подписчиков звонка и то, что после этого никому не нужно:
    /// заготовку записи без подписчиков и ленты кандидатов завершённого звонка.
    /// Сама завершённая запись остаётся, чтобы опоздавшие увидели `ended`.
    fn prune(&mut self, call_id: &str) {
        let mut ended = false;
        if let Some(entry) = self.calls.get_mut(call_id) {
            entry.watchers.retain(|tx| !tx.is_closed());
            ended = entry.is_ended();
            if entry.record.is_none() && entry.watchers.is_empty() {
                self.calls.remove(call_id);
            }
        }

        self.feeds.retain(|(id, _), feed| {
            if id != call_id {
                return true;
            }
            feed.watchers.retain(|tx| !tx.is_closed());
            !(ended && feed.watchers.is_empty())
        });
    }
}

/// Хранилище сигналинга в памяти процесса: для локальных звонков и тестов.
/// Соблюдает однократную запись offer/answer и append-only ленту кандидатов.
#[derive(Default)]
pub struct MemorySignalingStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySignalingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }

    /// Отписка снимает слушателя сразу, а не при следующем изменении
    fn subscription<T: Send + 'static>(
        &self,
        call_id: &str,
        rx: mpsc::UnboundedReceiver<T>,
    ) -> Subscription<T> {
        let inner: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let call_id = call_id.to_owned();
        Subscription::with_unsubscribe(rx, move || {
            if let Some(inner) = inner.upgrade() {
                lock_inner(&inner).prune(&call_id);
            }
        })
    }

    /// Удаляет завершённые звонки, на которые никто не подписан.
    /// Возвращает число удалённых записей.
    pub fn purge_ended(&self) -> usize {
        let mut inner = self.lock();
        let ended: Vec<String> = inner
            .calls
            .iter_mut()
            .filter_map(|(id, entry)| {
                entry.watchers.retain(|tx| !tx.is_closed());
                (entry.is_ended() && entry.watchers.is_empty()).then(|| id.clone())
            })
            .collect();
        for id in &ended {
            inner.calls.remove(id);
            inner.feeds.retain(|(call_id, _), _| call_id != id);
        }
        if !ended.is_empty() {
            debug!("Purged {} ended calls", ended.len());
        }
        ended.len()
    }

    /// Число звонков, о которых хранилище что-то помнит
    pub fn tracked_calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// Число лент кандидатов (звонок, участник)
    pub fn tracked_feeds(&self) -> usize {
        self.lock().feeds.len()
    }

    /// Число живых подписчиков на запись звонка
    pub fn record_subscribers(&self, call_id: &str) -> usize {
        self.lock()
            .calls
            .get(call_id)
            .map_or(0, |e| e.watchers.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Число живых подписчиков на кандидатов участника
    pub fn candidate_subscribers(&self, call_id: &str, participant_id: &str) -> usize {
        self.lock()
            .feeds
            .get(&(call_id.to_owned(), participant_id.to_owned()))
            .map_or(0, |e| e.watchers.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Все кандидаты участника в порядке добавления
    pub fn candidates(&self, call_id: &str, participant_id: &str) -> Vec<IceCandidate> {
        self.lock()
            .feeds
            .get(&(call_id.to_owned(), participant_id.to_owned()))
            .map(|e| e.candidates.clone())
            .unwrap_or_default()
    }

    fn write_description(&self, call_id: &str, desc: SessionDescription) -> Result<()> {
        let mut inner = self.lock();
        let not_found = || CallError::SignalingWriteFailed(format!("call {call_id} not found"));
        let entry = inner.calls.get_mut(call_id).ok_or_else(not_found)?;
        let Some(record) = entry.record.as_mut() else {
            return Err(not_found());
        };

        if record.ended {
            return Err(CallError::SignalingWriteFailed(format!(
                "call {call_id} already ended"
            )));
        }

        let slot = match desc.sdp_type {
            SdpType::Offer => &mut record.offer,
            SdpType::Answer => &mut record.answer,
        };
        if slot.is_some() {
            return Err(CallError::SignalingWriteFailed(format!(
                "{:?} for call {call_id} already written",
                desc.sdp_type
            )));
        }
        debug!(call_id, "Stored {:?}", desc.sdp_type);
        *slot = Some(desc);
        entry.notify();
        Ok(())
    }
}

#[async_trait]
impl SignalingStore for MemorySignalingStore {
    async fn create_call(&self, call_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner.calls.entry(call_id.to_owned()).or_default();
        if entry.record.is_none() {
            entry.record = Some(CallRecord::new());
            entry.notify();
        }
        Ok(())
    }

    async fn read_call(&self, call_id: &str) -> Result<Option<CallRecord>> {
        Ok(self
            .lock()
            .calls
            .get(call_id)
            .and_then(|e| e.record.clone()))
    }

    async fn write_offer(&self, call_id: &str, offer: SessionDescription) -> Result<()> {
        if offer.sdp_type != SdpType::Offer {
            return Err(CallError::SignalingWriteFailed("expected an offer".into()));
        }
        self.write_description(call_id, offer)
    }

    async fn write_answer(&self, call_id: &str, answer: SessionDescription) -> Result<()> {
        if answer.sdp_type != SdpType::Answer {
            return Err(CallError::SignalingWriteFailed("expected an answer".into()));
        }
        self.write_description(call_id, answer)
    }

    async fn subscribe(&self, call_id: &str) -> Result<Subscription<CallRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let entry = inner.calls.entry(call_id.to_owned()).or_default();
        if let Some(record) = &entry.record {
            let _ = tx.send(record.clone());
        }
        entry.watchers.push(tx);
        drop(inner);
        Ok(self.subscription(call_id, rx))
    }

    async fn mark_ended(&self, call_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner
            .calls
            .get_mut(call_id)
            .ok_or_else(|| CallError::CallNotFound(call_id.to_owned()))?;
        let Some(record) = entry.record.as_mut() else {
            return Err(CallError::CallNotFound(call_id.to_owned()));
        };
        if !record.ended {
            record.ended = true;
            record.ended_at = Some(chrono::Utc::now().timestamp());
            entry.notify();
        }
        inner.prune(call_id);
        Ok(())
    }
}

#[async_trait]
impl CandidateFeed for MemorySignalingStore {
    async fn append(
        &self,
        call_id: &str,
        participant_id: &str,
        candidate: IceCandidate,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.calls.get(call_id).is_some_and(CallEntry::is_ended) {
            debug!(call_id, "Dropping candidate for ended call");
            return Ok(());
        }
        let feed = inner
            .feeds
            .entry((call_id.to_owned(), participant_id.to_owned()))
            .or_default();
        feed.watchers.retain(|tx| tx.send(candidate.clone()).is_ok());
        feed.candidates.push(candidate);
        Ok(())
    }

    async fn subscribe_to_participant(
        &self,
        call_id: &str,
        participant_id: &str,
    ) -> Result<Subscription<IceCandidate>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let feed = inner
            .feeds
            .entry((call_id.to_owned(), participant_id.to_owned()))
            .or_default();
        for c in &feed.candidates {
            let _ = tx.send(c.clone());
        }
        feed.watchers.push(tx);
        drop(inner);
        Ok(self.subscription(call_id, rx))
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
