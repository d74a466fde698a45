//! Внешний сигналинг: общая запись звонка и лента кандидатов.
//!
//! Обе стороны звонка работают с одной и той же записью. Взаимного
//! исключения между ними нет: запись offer/answer однократна, лента
//! кандидатов только дополняется.

pub mod memory;

use crate::error::Result;
use crate::peer::types::{CallRecord, IceCandidate, SessionDescription};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use memory::MemorySignalingStore;

/// Подписка на поток изменений. Отписка через `unsubscribe()` или drop.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx, on_drop: None }
    }

    /// Для хранилищ, которым нужно явно снять слушателя на сервере
    pub fn with_unsubscribe(
        rx: mpsc::UnboundedReceiver<T>,
        f: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            on_drop: Some(Box::new(f)),
        }
    }

    /// Следующее изменение; `None`, если источник закрыт
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

/// Хранилище записей звонков.
///
/// `subscribe` сначала отдаёт текущее состояние записи (если она есть),
/// затем каждое изменение, как минимум один раз.
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Создаёт пустую запись. Существующая запись не трогается.
    async fn create_call(&self, call_id: &str) -> Result<()>;
    async fn read_call(&self, call_id: &str) -> Result<Option<CallRecord>>;
    async fn write_offer(&self, call_id: &str, offer: SessionDescription) -> Result<()>;
    async fn write_answer(&self, call_id: &str, answer: SessionDescription) -> Result<()>;
    async fn subscribe(&self, call_id: &str) -> Result<Subscription<CallRecord>>;
    async fn mark_ended(&self, call_id: &str) -> Result<()>;
}

/// Лента кандидатов, разбитая по звонку и участнику. Только добавление.
#[async_trait]
pub trait CandidateFeed: Send + Sync {
    async fn append(&self, call_id: &str, participant_id: &str, candidate: IceCandidate)
        -> Result<()>;

    /// Сначала уже накопленные кандидаты участника, затем новые, в порядке добавления
    async fn subscribe_to_participant(
        &self,
        call_id: &str,
        participant_id: &str,
    ) -> Result<Subscription<IceCandidate>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn unsubscribe_runs_hook_and_closes_channel() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let sub = Subscription::with_unsubscribe(rx, move || flag.store(true, Ordering::SeqCst));

        sub.unsubscribe();
        assert!(fired.load(Ordering::SeqCst));
        assert!(tx.is_closed());
    }
}
