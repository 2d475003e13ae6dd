//! Round Tick
//!
//! One call to [`tick`] is one elapsed second of a running session:
//!
//! 1. decrement the countdown
//! 2. broadcast `timer_update`
//! 3. at the warning threshold, broadcast `swap_warning`
//! 4. at zero, swap the payloads and restart the countdown

use tracing::{debug, info, warn};

use crate::network::protocol::{ServerMessage, SwapSender, SwappedCode};
use crate::swap::state::{Payload, SessionState, SwapSession};

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickResult {
    /// Countdown value that was broadcast.
    pub countdown: u32,
    /// Whether `swap_warning` was sent.
    pub warned: bool,
    /// Swap performed at the end of the round, if any.
    pub swap: Option<SwapOutcome>,
}

/// Payloads delivered by a swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    /// What slot 0 received (slot 1's previous payload).
    pub first_received: Payload,
    /// What slot 1 received (slot 0's previous payload).
    pub second_received: Payload,
}

/// Advance a running session by one second.
///
/// Returns `None` without side effects when the session is not running.
pub fn tick(session: &mut SwapSession) -> Option<TickResult> {
    if session.state() != SessionState::Running {
        return None;
    }

    session.countdown = session.countdown.saturating_sub(1);
    let countdown = session.countdown;
    session.broadcast(ServerMessage::TimerUpdate { timer: countdown });

    let warned = countdown == session.swap_warning_at() && countdown > 0;
    if warned {
        debug!("Session {} swap warning at {}s", session.id, countdown);
        session.broadcast(ServerMessage::SwapWarning);
    }

    let swap = if countdown == 0 {
        let outcome = perform_swap(session);
        session.countdown = session.round_duration();
        outcome
    } else {
        None
    };

    Some(TickResult {
        countdown,
        warned,
        swap,
    })
}

/// Exchange the payloads of both participants and deliver them.
///
/// Each side receives exactly what the other last reported, and keeps it as
/// its own payload afterwards. Returns `None` unless both slots are filled.
pub fn perform_swap(session: &mut SwapSession) -> Option<SwapOutcome> {
    if session.state() == SessionState::Terminated {
        return None;
    }
    let (first, second) = session.pair_mut()?;

    std::mem::swap(&mut first.payload, &mut second.payload);

    let delivered = [
        first.connection.send(ServerMessage::CodeSwap(SwappedCode {
            code: first.payload.code.clone(),
            language: first.payload.language.clone(),
            sender: SwapSender::for_slot(1),
        })),
        second.connection.send(ServerMessage::CodeSwap(SwappedCode {
            code: second.payload.code.clone(),
            language: second.payload.language.clone(),
            sender: SwapSender::for_slot(0),
        })),
    ];

    let outcome = SwapOutcome {
        first_received: first.payload.clone(),
        second_received: second.payload.clone(),
    };

    // The exchange stands even when a frame is dropped; the receiver only
    // sees the partner's code again after the next swap.
    for (slot, ok) in delivered.into_iter().enumerate() {
        if !ok {
            warn!(
                "Session {} code_swap to {:?} not delivered",
                session.id,
                SwapSender::for_slot(slot)
            );
        }
    }

    session.rounds_completed += 1;
    info!(
        "Session {} swapped code ({:?} <-> {:?}), round {}",
        session.id,
        outcome.second_received.language,
        outcome.first_received.language,
        session.rounds_completed
    );

    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::ConnectionHandle;
    use crate::swap::state::SessionId;
    use proptest::prelude::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Pair {
        session: SwapSession,
        first: ConnectionHandle,
        second: ConnectionHandle,
        first_rx: mpsc::Receiver<ServerMessage>,
        second_rx: mpsc::Receiver<ServerMessage>,
    }

    fn running_pair(round_duration: u32, warning_at: u32) -> Pair {
        let (first, mut first_rx) = ConnectionHandle::channel(1024);
        let (second, mut second_rx) = ConnectionHandle::channel(1024);
        let mut session = SwapSession::new(
            SessionId::from("4821"),
            first.clone(),
            round_duration,
            warning_at,
        );
        session.seat(second.clone()).unwrap();
        session.start_round(CancellationToken::new()).unwrap();

        // Discard game_start.
        first_rx.try_recv().unwrap();
        second_rx.try_recv().unwrap();

        Pair {
            session,
            first,
            second,
            first_rx,
            second_rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_tick_requires_running_session() {
        let (creator, mut rx) = ConnectionHandle::channel(16);
        let mut session = SwapSession::new(SessionId::from("1000"), creator, 300, 30);

        assert!(tick(&mut session).is_none());
        assert_eq!(session.countdown(), 300);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_round_countdown() {
        let mut pair = running_pair(300, 30);

        let mut results = Vec::new();
        for _ in 0..300 {
            results.push(tick(&mut pair.session).unwrap());
        }

        let values: Vec<u32> = results.iter().map(|r| r.countdown).collect();
        let expected: Vec<u32> = (0..300).rev().collect();
        assert_eq!(values, expected);

        assert_eq!(results.iter().filter(|r| r.warned).count(), 1);
        assert!(results[269].warned);
        assert_eq!(results[269].countdown, 30);

        assert!(results[..299].iter().all(|r| r.swap.is_none()));
        assert!(results[299].swap.is_some());
        assert_eq!(pair.session.countdown(), 300);
        assert_eq!(pair.session.rounds_completed(), 1);
    }

    #[test]
    fn test_frame_order_around_warning_and_swap() {
        let mut pair = running_pair(3, 1);

        for _ in 0..3 {
            tick(&mut pair.session).unwrap();
        }

        let frames = drain(&mut pair.first_rx);
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0], ServerMessage::TimerUpdate { timer: 2 });
        assert_eq!(frames[1], ServerMessage::TimerUpdate { timer: 1 });
        assert_eq!(frames[2], ServerMessage::SwapWarning);
        assert_eq!(frames[3], ServerMessage::TimerUpdate { timer: 0 });
        assert!(matches!(frames[4], ServerMessage::CodeSwap(_)));

        assert_eq!(drain(&mut pair.second_rx).len(), 5);
    }

    #[test]
    fn test_countdown_restarts_after_swap() {
        let mut pair = running_pair(5, 2);

        let values: Vec<u32> = (0..12)
            .map(|_| tick(&mut pair.session).unwrap().countdown)
            .collect();
        assert_eq!(values, vec![4, 3, 2, 1, 0, 4, 3, 2, 1, 0, 4, 3]);
        assert_eq!(pair.session.rounds_completed(), 2);

        let warnings = drain(&mut pair.first_rx)
            .into_iter()
            .filter(|m| *m == ServerMessage::SwapWarning)
            .count();
        assert_eq!(warnings, 2);
    }

    #[test]
    fn test_swap_exchanges_latest_payloads() {
        let mut pair = running_pair(300, 30);
        let first_id = pair.first.id();
        let second_id = pair.second.id();

        pair.session
            .update_payload(&first_id, Payload::new("fn a() {}", "rust"));
        pair.session
            .update_payload(&second_id, Payload::new("def b(): pass", "python"));

        let outcome = perform_swap(&mut pair.session).unwrap();
        assert_eq!(outcome.first_received, Payload::new("def b(): pass", "python"));
        assert_eq!(outcome.second_received, Payload::new("fn a() {}", "rust"));

        assert_eq!(
            pair.first_rx.try_recv().unwrap(),
            ServerMessage::CodeSwap(SwappedCode {
                code: "def b(): pass".into(),
                language: "python".into(),
                sender: SwapSender::Player2,
            })
        );
        assert_eq!(
            pair.second_rx.try_recv().unwrap(),
            ServerMessage::CodeSwap(SwappedCode {
                code: "fn a() {}".into(),
                language: "rust".into(),
                sender: SwapSender::Player1,
            })
        );
    }

    #[test]
    fn test_swap_with_empty_payloads() {
        let mut pair = running_pair(300, 30);
        let outcome = perform_swap(&mut pair.session).unwrap();
        assert_eq!(outcome.first_received, Payload::default());
        assert_eq!(outcome.second_received, Payload::default());
    }

    #[test]
    fn test_latest_update_wins() {
        let mut pair = running_pair(300, 30);
        let first_id = pair.first.id();

        pair.session.update_payload(&first_id, Payload::new("v1", "rust"));
        pair.session.update_payload(&first_id, Payload::new("v2", "rust"));

        let outcome = perform_swap(&mut pair.session).unwrap();
        assert_eq!(outcome.second_received.code, "v2");
    }

    #[test]
    fn test_swap_stands_when_one_side_is_backed_up() {
        let (first, mut first_rx) = ConnectionHandle::channel(1);
        let (second, mut second_rx) = ConnectionHandle::channel(16);
        let mut session = SwapSession::new(SessionId::from("4821"), first.clone(), 300, 30);
        session.seat(second.clone()).unwrap();
        session.start_round(CancellationToken::new()).unwrap();
        second_rx.try_recv().unwrap();

        session.update_payload(&first.id(), Payload::new("A", "rust"));
        session.update_payload(&second.id(), Payload::new("B", "go"));

        // game_start still sits in the first buffer, so its code_swap is dropped.
        let outcome = perform_swap(&mut session).unwrap();
        assert_eq!(outcome.first_received, Payload::new("B", "go"));
        assert_eq!(session.participant(0).unwrap().payload, Payload::new("B", "go"));
        assert_eq!(first_rx.try_recv().unwrap(), ServerMessage::GameStart { timer: 300 });
        assert!(first_rx.try_recv().is_err());

        match second_rx.try_recv().unwrap() {
            ServerMessage::CodeSwap(code) => assert_eq!(code.code, "A"),
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_swap_after_terminate_does_nothing() {
        let mut pair = running_pair(3, 1);
        pair.session.terminate();

        assert!(perform_swap(&mut pair.session).is_none());
        assert!(tick(&mut pair.session).is_none());
        assert!(drain(&mut pair.first_rx).is_empty());
        assert!(drain(&mut pair.second_rx).is_empty());
    }

    #[test]
    fn test_warning_threshold_zero_never_warns() {
        let mut pair = running_pair(3, 0);
        let warned = (0..3).any(|_| tick(&mut pair.session).unwrap().warned);
        assert!(!warned);
    }

    proptest! {
        #[test]
        fn prop_two_swaps_restore_payloads(
            code_a in ".*", lang_a in "[a-z]{0,12}",
            code_b in ".*", lang_b in "[a-z]{0,12}",
        ) {
            let mut pair = running_pair(300, 30);
            let a = Payload::new(code_a, lang_a);
            let b = Payload::new(code_b, lang_b);
            pair.session.update_payload(&pair.first.id(), a.clone());
            pair.session.update_payload(&pair.second.id(), b.clone());

            let once = perform_swap(&mut pair.session).unwrap();
            prop_assert_eq!(&once.first_received, &b);
            prop_assert_eq!(&once.second_received, &a);

            let twice = perform_swap(&mut pair.session).unwrap();
            prop_assert_eq!(&twice.first_received, &a);
            prop_assert_eq!(&twice.second_received, &b);
        }

        #[test]
        fn prop_countdown_stays_in_range(round in 1u32..40, warn in 0u32..40, ticks in 0usize..200) {
            let mut pair = running_pair(round, warn);
            for _ in 0..ticks {
                let result = tick(&mut pair.session).unwrap();
                prop_assert!(result.countdown < round);
                prop_assert!(pair.session.countdown() <= round);
                prop_assert_eq!(result.swap.is_some(), result.countdown == 0);
            }
        }
    }
}
