//! End-to-end ack classification and deferred confirmation timing, driven
//! on a paused clock so the 5s ack window and 30s confirm wait cost nothing.

mod common;

use std::time::Duration;

use common::{test_config, ScriptedLink, ScriptedReply, ADDR_C, ADDR_STRANGER};
use meshwx::station::{PeerContext, Station};
use meshwx::template::Reading;

fn reading() -> Reading {
    Reading {
        temperature_f: 72.5,
        humidity: 44.0,
    }
}

#[tokio::test(start_paused = true)]
async fn real_ack_schedules_confirmation_after_confirm_wait_not_before() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    // Connected node is not a configured peer: point-to-point to C.
    let (link, events, sends) = ScriptedLink::new(ADDR_STRANGER, ScriptedReply::AckFromDest);
    let mut station = Station::new(config, Box::new(link), events).unwrap();

    station.on_tick().await;
    assert!(station.is_connected());
    assert_eq!(station.self_peer(), None);

    let outcome = station
        .submit_reading(&reading(), &PeerContext::default())
        .await
        .unwrap();
    assert_eq!(outcome.sent, 1);
    assert!(outcome.acked.contains("C"), "outcome: {:?}", outcome);
    assert!(outcome.pending.is_empty());

    {
        let sent = sends.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, ADDR_C);
        assert!(sent[0].want_ack);
    }

    // Confirmation is due 30s after the ack, which arrived at the start of
    // the 5s ack window. 24s later (t+29) nothing must have fired.
    tokio::time::sleep(Duration::from_secs(24)).await;
    assert_eq!(sends.lock().unwrap().len(), 1, "confirmation fired early");

    // Crossing the confirm-wait boundary releases exactly one reply, sent
    // without want_ack so it can never trigger an ack-of-ack loop.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let sent = sends.lock().unwrap();
    assert_eq!(sent.len(), 2, "confirmation missing");
    assert_eq!(sent[1].dest, ADDR_C);
    assert!(!sent[1].want_ack);
    assert!(
        sent[1].payload.starts_with("rx ok"),
        "unexpected confirmation payload '{}'",
        sent[1].payload
    );
}

#[tokio::test(start_paused = true)]
async fn implicit_ack_is_not_delivery_and_earns_no_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (link, events, sends) = ScriptedLink::new(ADDR_STRANGER, ScriptedReply::AckFromLocal);
    let mut station = Station::new(config, Box::new(link), events).unwrap();

    station.on_tick().await;
    let outcome = station
        .submit_reading(&reading(), &PeerContext::default())
        .await
        .unwrap();

    // The local node confirming its own queue must never count as success.
    assert!(outcome.acked.is_empty(), "outcome: {:?}", outcome);
    assert!(outcome.pending.contains("C"));

    // Well past the confirm wait but short of the retry delay: no
    // confirmation reply may have been sent.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(sends.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn nak_is_terminal_for_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let (link, events, sends) = ScriptedLink::new(ADDR_STRANGER, ScriptedReply::Nak(2));
    let mut station = Station::new(config, Box::new(link), events).unwrap();

    station.on_tick().await;
    let outcome = station
        .submit_reading(&reading(), &PeerContext::default())
        .await
        .unwrap();
    assert!(outcome.naked.contains("C"), "outcome: {:?}", outcome);
    assert!(outcome.pending.is_empty());

    // Naked peers are settled: no retry, no confirmation, ever.
    tokio::time::sleep(Duration::from_secs(180)).await;
    assert_eq!(sends.lock().unwrap().len(), 1);
}
