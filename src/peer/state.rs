use crate::peer::types::{IceCandidate, SdpType};

/// Что уже применено как remote description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteSlot {
    #[default]
    Unset,
    OfferApplied,
    AnswerApplied,
}

impl RemoteSlot {
    pub fn is_set(self) -> bool {
        self != RemoteSlot::Unset
    }
}

/// Локальное состояние согласования одной стороны звонка
#[derive(Debug, Default)]
pub struct NegotiationState {
    slot: RemoteSlot,
    /// Кандидаты, полученные до установки remote description
    pending: Vec<IceCandidate>,
    local_written: bool,
}

impl NegotiationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self) -> RemoteSlot {
        self.slot
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Применять ли удалённое описание данного типа. Инициатор ждёт answer,
    /// отвечающий ждёт offer; каждое применяется не больше одного раза.
    pub fn wants_remote(&self, is_initiator: bool, sdp_type: SdpType) -> bool {
        if self.slot.is_set() {
            return false;
        }
        match sdp_type {
            SdpType::Offer => !is_initiator,
            SdpType::Answer => is_initiator,
        }
    }

    /// Отмечает удалённое описание применённым и отдаёт буфер кандидатов
    /// в порядке поступления. Буфер после этого пуст и больше не заполняется.
    pub fn remote_applied(&mut self, sdp_type: SdpType) -> Vec<IceCandidate> {
        self.slot = match sdp_type {
            SdpType::Offer => RemoteSlot::OfferApplied,
            SdpType::Answer => RemoteSlot::AnswerApplied,
        };
        std::mem::take(&mut self.pending)
    }

    /// Кандидат от удалённой стороны: `Some`: применить сразу,
    /// `None`: отложен до установки remote description.
    pub fn remote_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.slot.is_set() {
            Some(candidate)
        } else {
            self.pending.push(candidate);
            None
        }
    }

    /// Наш offer или answer уже записан в хранилище
    pub fn local_written(&self) -> bool {
        self.local_written
    }

    pub fn set_local_written(&mut self) {
        self.local_written = true;
    }
}
