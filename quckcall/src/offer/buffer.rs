use std::collections::HashMap;

use quckcall_signaling::{CallId, IceCandidate, ParticipantId};

/// A remote offer waiting for the local user to accept the call.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedOffer {
    pub call_id: CallId,
    pub from_participant: ParticipantId,
    pub sdp: String,
    /// Remote candidates that arrived after the offer and before acceptance.
    pub candidates: Vec<IceCandidate>,
}

/// Holds inbound offers until the call reaches `Connecting`.
///
/// Keeps at most one offer per participant and call; a re-offer replaces the
/// earlier one together with its candidates.
#[derive(Debug, Default)]
pub struct OfferBuffer {
    offers: HashMap<CallId, Vec<BufferedOffer>>,
}

impl OfferBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when an earlier offer from the same participant was
    /// replaced.
    pub fn buffer(&mut self, call_id: CallId, from_participant: ParticipantId, sdp: String) -> bool {
        let offers = self.offers.entry(call_id.clone()).or_default();
        if let Some(existing) = offers
            .iter_mut()
            .find(|o| o.from_participant == from_participant)
        {
            existing.sdp = sdp;
            existing.candidates.clear();
            return true;
        }
        offers.push(BufferedOffer {
            call_id,
            from_participant,
            sdp,
            candidates: Vec::new(),
        });
        false
    }

    /// Attach an early remote candidate to the buffered offer it belongs to.
    /// Returns `false`, dropping the candidate, when no such offer is held.
    pub fn buffer_candidate(
        &mut self,
        call_id: &CallId,
        from_participant: &ParticipantId,
        candidate: IceCandidate,
    ) -> bool {
        let offer = self
            .offers
            .get_mut(call_id)
            .and_then(|offers| offers.iter_mut().find(|o| &o.from_participant == from_participant));
        match offer {
            Some(offer) => {
                offer.candidates.push(candidate);
                true
            }
            None => false,
        }
    }

    /// Remove and return every offer for the call, in arrival order.
    pub fn drain(&mut self, call_id: &CallId) -> Vec<BufferedOffer> {
        self.offers.remove(call_id).unwrap_or_default()
    }

    /// Drop the call's offers. Returns how many were dropped.
    pub fn discard(&mut self, call_id: &CallId) -> usize {
        self.offers.remove(call_id).map_or(0, |offers| offers.len())
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.offers.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.offers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.1 5000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }

    #[test]
    fn test_reoffer_keeps_latest() {
        let mut buffer = OfferBuffer::new();
        let call = CallId::from("call-1");
        let bob = ParticipantId::from("bob");
        assert!(!buffer.buffer(call.clone(), bob.clone(), "offer-1".into()));
        assert!(buffer.buffer_candidate(&call, &bob, candidate(1)));
        assert!(buffer.buffer(call.clone(), bob.clone(), "offer-2".into()));
        assert_eq!(buffer.len(), 1);

        let drained = buffer.drain(&call);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].sdp, "offer-2");
        assert!(drained[0].candidates.is_empty());
        assert!(buffer.is_empty());
        assert!(buffer.drain(&call).is_empty());
    }

    #[test]
    fn test_offers_are_kept_per_participant() {
        let mut buffer = OfferBuffer::new();
        let call = CallId::from("call-1");
        buffer.buffer(call.clone(), "bob".into(), "from-bob".into());
        buffer.buffer(call.clone(), "carol".into(), "from-carol".into());
        buffer.buffer("call-2".into(), "dave".into(), "other".into());
        assert_eq!(buffer.len(), 3);

        let drained = buffer.drain(&call);
        let senders: Vec<_> = drained.iter().map(|o| o.from_participant.as_str()).collect();
        assert_eq!(senders, ["bob", "carol"]);
        assert!(buffer.contains(&CallId::from("call-2")));
    }

    #[test]
    fn test_candidate_without_offer_is_dropped() {
        let mut buffer = OfferBuffer::new();
        let call = CallId::from("call-1");
        assert!(!buffer.buffer_candidate(&call, &"bob".into(), candidate(1)));
        buffer.buffer(call.clone(), "bob".into(), "offer".into());
        assert!(!buffer.buffer_candidate(&call, &"carol".into(), candidate(2)));
        assert!(buffer.buffer_candidate(&call, &"bob".into(), candidate(3)));
        assert_eq!(buffer.drain(&call)[0].candidates, vec![candidate(3)]);
    }

    #[test]
    fn test_discard() {
        let mut buffer = OfferBuffer::new();
        let call = CallId::from("call-1");
        buffer.buffer(call.clone(), "bob".into(), "offer".into());
        assert_eq!(buffer.discard(&call), 1);
        assert_eq!(buffer.discard(&call), 0);
        assert!(buffer.drain(&call).is_empty());
    }
}
