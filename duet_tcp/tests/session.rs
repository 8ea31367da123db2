use std::time::Duration;

use duet::{
    reveal::{combine, AttributionResult, Output, RevealMode},
    rules::attribution_circuit,
    Conversion, Event, Role, Touchpoint, TouchpointKind,
};
use duet_tcp::{
    channel::{Channel, ChannelError, MemoryChannel, TcpChannel},
    Session, SessionConfig, SessionError, SessionOutcome, SessionPhase,
};
use tokio::net::TcpListener;

fn config(role: Role, rule: Option<&str>, touchpoints: usize, conversions: usize) -> SessionConfig {
    SessionConfig {
        role,
        address: "127.0.0.1:0".into(),
        rule: rule.map(|r| r.parse().unwrap()),
        reveal_mode: RevealMode::Immediate,
        touchpoints,
        conversions,
        timeout: 5,
        max_frame_bytes: 64 * 1024 * 1024,
    }
}

fn touchpoints() -> Vec<Event> {
    vec![
        Touchpoint::new(1, 1_000, 7, TouchpointKind::Click).into(),
        Touchpoint::new(2, 2_000, 7, TouchpointKind::View).into(),
        Touchpoint::new(3, 2_500, 8, TouchpointKind::Click).into(),
    ]
}

fn conversions() -> Vec<Event> {
    vec![
        Conversion::new(10, 3_000, 7).into(),
        Conversion::new(11, 3_000, 9).into(),
    ]
}

async fn run_pair(
    publisher: SessionConfig,
    publisher_events: Vec<Event>,
    partner: SessionConfig,
    partner_events: Vec<Event>,
) -> (
    (Result<SessionOutcome, SessionError>, SessionPhase),
    (Result<SessionOutcome, SessionError>, SessionPhase),
) {
    let (a, b) = MemoryChannel::pair();
    let a = a.with_timeout(Duration::from_secs(5));
    let b = b.with_timeout(Duration::from_secs(5));
    let publisher = tokio::spawn(async move {
        let mut session = Session::new(publisher, a).unwrap();
        assert_eq!(session.phase(), SessionPhase::Setup);
        let result = session.run(publisher_events).await;
        (result, session.phase())
    });
    let partner = tokio::spawn(async move {
        let mut session = Session::new(partner, b).unwrap();
        let result = session.run(partner_events).await;
        (result, session.phase())
    });
    (publisher.await.unwrap(), partner.await.unwrap())
}

#[tokio::test]
async fn immediate_reveal_over_memory_channel() {
    let ((publisher, publisher_phase), (partner, partner_phase)) = run_pair(
        config(Role::Publisher, Some("last_click_1d"), 3, 2),
        touchpoints(),
        config(Role::Partner, None, 3, 2),
        conversions(),
    )
    .await;
    let publisher = publisher.unwrap();
    let partner = partner.unwrap();
    assert_eq!(publisher_phase, SessionPhase::ShareOutput);
    assert_eq!(partner_phase, SessionPhase::ShareOutput);

    let expected = Output::Revealed(vec![
        AttributionResult::Attributed { touchpoint_id: 1 },
        AttributionResult::Unattributed,
    ]);
    assert_eq!(publisher.output, expected);
    assert_eq!(partner.output, expected);
    assert_eq!(partner.rule, publisher.rule);
    assert_eq!(partner.rule.to_string(), "last_click_1d");

    let circuit = attribution_circuit(publisher.rule, 3, 2).unwrap();
    assert_eq!(publisher.transcript.rounds(), 2 + circuit.and_depth());
    assert_eq!(partner.transcript.rounds(), publisher.transcript.rounds());
    assert_eq!(publisher.transcript.setup.sent, 1);
    assert_eq!(publisher.transcript.input_encoding.received, 1);
    assert_eq!(publisher.transcript.share_output.received, 1);
    assert_eq!(
        publisher.transcript.secure_evaluation.bytes_sent,
        partner.transcript.secure_evaluation.bytes_received
    );
}

#[tokio::test]
async fn rounds_do_not_depend_on_the_events() {
    let other_touchpoints: Vec<Event> = vec![
        Touchpoint::new(0, 0, 0, TouchpointKind::View).into(),
        Touchpoint::new(u32::MAX, u32::MAX, 1, TouchpointKind::View).into(),
        Touchpoint::new(5, 5, 5, TouchpointKind::Click).into(),
    ];
    let other_conversions: Vec<Event> = vec![
        Conversion::new(0, 0, 0).into(),
        Conversion::new(1, u32::MAX, 1).into(),
    ];

    let mut transcripts = vec![];
    for (tps, convs) in [
        (touchpoints(), conversions()),
        (other_touchpoints, other_conversions),
    ] {
        let ((publisher, _), (partner, _)) = run_pair(
            config(Role::Publisher, Some("last_touch_7d"), 3, 2),
            tps,
            config(Role::Partner, Some("last_touch_7d"), 3, 2),
            convs,
        )
        .await;
        transcripts.push((
            publisher.unwrap().transcript,
            partner.unwrap().transcript,
        ));
    }
    let (a, b) = (&transcripts[0], &transcripts[1]);
    assert_eq!(a.0.rounds(), b.0.rounds());
    assert_eq!(a.1.rounds(), b.1.rounds());
    assert_eq!(a.0.secure_evaluation.sent, b.0.secure_evaluation.sent);
}

#[tokio::test]
async fn deferred_reveal_keeps_the_shares() {
    let mut publisher_config = config(Role::Publisher, Some("last_touch_1d"), 3, 2);
    publisher_config.reveal_mode = RevealMode::Deferred;
    let mut partner_config = config(Role::Partner, None, 3, 2);
    partner_config.reveal_mode = RevealMode::Deferred;

    let ((publisher, _), (partner, _)) =
        run_pair(publisher_config, touchpoints(), partner_config, conversions()).await;
    let publisher = publisher.unwrap();
    let partner = partner.unwrap();
    assert_eq!(publisher.transcript.share_output.sent, 0);
    assert_eq!(partner.transcript.share_output.received, 0);

    let (Output::Deferred(a), Output::Deferred(b)) = (publisher.output, partner.output) else {
        panic!("deferred sessions must not reveal the results");
    };
    assert_eq!(a.role, Role::Publisher);
    assert_eq!(b.role, Role::Partner);
    assert_eq!(
        combine(&a, &b).unwrap(),
        vec![
            AttributionResult::Attributed { touchpoint_id: 2 },
            AttributionResult::Unattributed,
        ]
    );
}

#[tokio::test]
async fn mismatched_setup_fails_on_both_sides() {
    let ((publisher, publisher_phase), (partner, partner_phase)) = run_pair(
        config(Role::Publisher, Some("last_click_1d"), 3, 2),
        touchpoints(),
        config(Role::Partner, Some("last_touch_1d"), 3, 2),
        conversions(),
    )
    .await;
    assert!(matches!(publisher, Err(SessionError::Configuration(_))));
    assert!(matches!(partner, Err(SessionError::Configuration(_))));
    assert_eq!(publisher_phase, SessionPhase::Failed);
    assert_eq!(partner_phase, SessionPhase::Failed);

    let ((publisher, _), (partner, _)) = run_pair(
        config(Role::Publisher, Some("last_click_1d"), 3, 2),
        touchpoints(),
        config(Role::Partner, None, 3, 3),
        conversions(),
    )
    .await;
    assert!(matches!(publisher, Err(SessionError::Configuration(_))));
    assert!(matches!(partner, Err(SessionError::Configuration(_))));
}

#[tokio::test]
async fn wrong_record_count_aborts_the_session() {
    let ((publisher, _), (partner, partner_phase)) = run_pair(
        config(Role::Publisher, Some("last_click_1d"), 3, 2),
        touchpoints(),
        config(Role::Partner, None, 3, 2),
        conversions()[..1].to_vec(),
    )
    .await;
    assert!(matches!(partner, Err(SessionError::Configuration(_))));
    assert_eq!(partner_phase, SessionPhase::Failed);
    assert!(matches!(publisher, Err(SessionError::Connection(_))));
}

#[tokio::test]
async fn garbage_from_the_peer_is_a_desync() {
    let (a, mut b) = MemoryChannel::pair();
    let publisher = tokio::spawn(async move {
        let mut session =
            Session::new(config(Role::Publisher, Some("last_click_1d"), 3, 2), a).unwrap();
        let result = session.run(touchpoints()).await;
        (result, session.phase())
    });

    let _hello = b.recv_bytes().await.unwrap();
    b.send_bytes(vec![0xFF; 3]).await.unwrap();

    let (result, phase) = publisher.await.unwrap();
    assert!(matches!(result, Err(SessionError::ProtocolDesync(_))));
    assert_eq!(phase, SessionPhase::Failed);
    assert!(matches!(b.recv_bytes().await, Err(ChannelError::Closed)));
}

#[tokio::test]
async fn disconnect_during_evaluation_fails_both_sides() {
    let (publisher_end, mut to_publisher) = MemoryChannel::pair();
    let (mut to_partner, partner_end) = MemoryChannel::pair();
    let publisher = tokio::spawn(async move {
        let config = config(Role::Publisher, Some("last_click_1d"), 3, 2);
        let mut session = Session::new(config, publisher_end).unwrap();
        let result = session.run(touchpoints()).await;
        (result, session.phase())
    });
    let partner = tokio::spawn(async move {
        let mut session = Session::new(config(Role::Partner, None, 3, 2), partner_end).unwrap();
        let result = session.run(conversions()).await;
        (result, session.phase())
    });

    // both hellos and the first engine messages, long before the last AND layer
    for frame in 0..8 {
        if frame % 2 == 0 {
            let msg = to_publisher.recv_bytes().await.unwrap();
            to_partner.send_bytes(msg).await.unwrap();
        } else {
            let msg = to_partner.recv_bytes().await.unwrap();
            to_publisher.send_bytes(msg).await.unwrap();
        }
    }
    drop(to_publisher);
    drop(to_partner);

    let (publisher, publisher_phase) = publisher.await.unwrap();
    let (partner, partner_phase) = partner.await.unwrap();
    assert!(matches!(
        publisher,
        Err(SessionError::Connection(ChannelError::Closed))
    ));
    assert!(matches!(
        partner,
        Err(SessionError::Connection(ChannelError::Closed))
    ));
    assert_eq!(publisher_phase, SessionPhase::Failed);
    assert_eq!(partner_phase, SessionPhase::Failed);
}

#[tokio::test]
async fn session_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let timeout = Duration::from_secs(5);

    let mut partner_config = config(Role::Partner, None, 3, 2);
    partner_config.address = addr.to_string();
    let partner = tokio::spawn(duet_tcp::run_partner(partner_config, conversions()));

    let channel = TcpChannel::accept(&listener, timeout, 1 << 20).await.unwrap();
    let publisher_config = config(Role::Publisher, Some("last_click_1d"), 3, 2);
    let publisher = Session::new(publisher_config, channel)
        .unwrap()
        .run(touchpoints())
        .await
        .unwrap();
    let partner = partner.await.unwrap().unwrap();

    assert_eq!(publisher.output, partner.output);
    assert_eq!(
        partner.output,
        Output::Revealed(vec![
            AttributionResult::Attributed { touchpoint_id: 1 },
            AttributionResult::Unattributed,
        ])
    );
}

#[tokio::test]
async fn connection_refused_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut partner_config = config(Role::Partner, None, 3, 2);
    partner_config.address = addr.to_string();
    let result = duet_tcp::run_partner(partner_config, conversions()).await;
    assert!(matches!(result, Err(SessionError::Connection(_))));

    let result = duet_tcp::run_publisher(config(Role::Partner, None, 3, 2), conversions()).await;
    assert!(matches!(result, Err(SessionError::Configuration(_))));
}
