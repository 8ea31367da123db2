use duet::{
    reveal::{combine, reveal, AttributionResult, AttributionShares, Output, RevealMode},
    rules::{attribute, attribution_circuit, AttributionRule},
    simulate_attribution,
    states::{Partner, Phase, Publisher},
    Conversion, Error, PartyInput, Role, Touchpoint, TouchpointKind,
};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

const HOUR: u32 = 3_600;
const DAY: u32 = 24 * HOUR;

fn click(id: u32, timestamp: u32, ad_id: u32) -> Touchpoint {
    Touchpoint::new(id, timestamp, ad_id, TouchpointKind::Click)
}

fn view(id: u32, timestamp: u32, ad_id: u32) -> Touchpoint {
    Touchpoint::new(id, timestamp, ad_id, TouchpointKind::View)
}

fn attributed(touchpoint_id: u32) -> AttributionResult {
    AttributionResult::Attributed { touchpoint_id }
}

fn run(
    rule: &str,
    touchpoints: &[Touchpoint],
    conversions: &[Conversion],
) -> Result<Vec<AttributionResult>, Error> {
    let rule: AttributionRule = rule.parse()?;
    let (publisher, partner) = simulate_attribution(rule, touchpoints, conversions)?;
    assert_eq!(publisher.role, Role::Publisher);
    assert_eq!(partner.role, Role::Partner);
    let results = combine(&publisher, &partner)?;
    assert_eq!(results, attribute(rule, touchpoints, conversions));
    Ok(results)
}

#[test]
fn last_click_ignores_views() -> Result<(), Error> {
    let touchpoints = vec![
        click(1, 1_000, 7),
        view(2, 2_000, 7),
        click(3, 1_500, 8),
    ];
    let conversions = vec![Conversion::new(100, 3_000, 7)];

    assert_eq!(
        run("last_click_1d", &touchpoints, &conversions)?,
        vec![attributed(1)]
    );
    assert_eq!(
        run("last_touch_1d", &touchpoints, &conversions)?,
        vec![attributed(2)]
    );

    Ok(())
}

#[test]
fn touchpoints_outside_the_window_are_ignored() -> Result<(), Error> {
    let touchpoints = vec![click(1, 10_000, 1), click(2, 10_000 + 2 * DAY, 1)];
    let conversions = vec![
        Conversion::new(100, 10_000 + DAY, 1),
        Conversion::new(101, 10_000 + DAY + 1, 1),
        Conversion::new(102, 10_000, 1),
        Conversion::new(103, 10_000 + 3 * DAY + 1, 1),
    ];

    assert_eq!(
        run("last_click_1d", &touchpoints, &conversions)?,
        vec![
            attributed(1),
            AttributionResult::Unattributed,
            AttributionResult::Unattributed,
            AttributionResult::Unattributed,
        ]
    );
    assert_eq!(
        run("last_click_3d", &touchpoints, &conversions)?,
        vec![
            attributed(1),
            attributed(1),
            AttributionResult::Unattributed,
            attributed(2),
        ]
    );

    Ok(())
}

#[test]
fn window_does_not_wrap_around() -> Result<(), Error> {
    let touchpoints = vec![click(1, u32::MAX - 10, 1)];
    let conversions = vec![Conversion::new(100, u32::MAX, 1), Conversion::new(101, 5, 1)];

    assert_eq!(
        run("last_click_1d", &touchpoints, &conversions)?,
        vec![attributed(1), AttributionResult::Unattributed]
    );

    Ok(())
}

#[test]
fn ties_go_to_the_lowest_id() -> Result<(), Error> {
    let touchpoints = vec![click(9, 500, 3), click(4, 500, 3), click(6, 500, 3)];
    let conversions = vec![Conversion::new(100, 600, 3)];

    assert_eq!(
        run("last_touch_1h", &touchpoints, &conversions)?,
        vec![attributed(4)]
    );

    Ok(())
}

#[test]
fn touchpoint_with_id_zero_is_distinguishable() -> Result<(), Error> {
    let touchpoints = vec![click(0, 500, 3)];
    let conversions = vec![Conversion::new(100, 600, 3), Conversion::new(101, 600, 4)];

    assert_eq!(
        run("last_click_1d", &touchpoints, &conversions)?,
        vec![attributed(0), AttributionResult::Unattributed]
    );

    Ok(())
}

#[test]
fn empty_inputs() -> Result<(), Error> {
    let conversions = vec![Conversion::new(100, 600, 3)];
    assert_eq!(
        run("last_click_1d", &[], &conversions)?,
        vec![AttributionResult::Unattributed]
    );
    assert_eq!(run("last_click_1d", &[click(1, 2, 3)], &[])?, vec![]);

    Ok(())
}

#[test]
fn deferred_shares_can_be_combined_later() -> Result<(), Error> {
    let rule: AttributionRule = "last_touch_7d".parse()?;
    let touchpoints = vec![view(1, 100, 1), click(2, 200, 2)];
    let conversions = vec![Conversion::new(10, 300, 2), Conversion::new(11, 300, 5)];
    let (publisher, partner) = simulate_attribution(rule, &touchpoints, &conversions)?;

    let publisher = match reveal(RevealMode::Deferred, publisher, None)? {
        Output::Deferred(shares) => shares,
        Output::Revealed(_) => panic!("deferred reveal must not reconstruct results"),
    };
    let stored = serde_json::to_string(&publisher).unwrap();
    let restored: AttributionShares = serde_json::from_str(&stored).unwrap();

    assert_eq!(
        reveal(RevealMode::Immediate, partner, Some(&restored))?,
        Output::Revealed(vec![attributed(2), AttributionResult::Unattributed])
    );

    Ok(())
}

#[test]
fn shares_of_different_sessions_do_not_combine() -> Result<(), Error> {
    let rule: AttributionRule = "last_touch_1d".parse()?;
    let touchpoints = vec![click(1, 100, 1)];
    let conversions = vec![Conversion::new(10, 50, 1); 64];
    let (publisher, _) = simulate_attribution(rule, &touchpoints, &conversions)?;
    let (_, partner) = simulate_attribution(rule, &touchpoints, &conversions)?;

    // Every combined bit is random, so at least one of the 64 conversions ends up unattributed
    // with a non-zero id, except with negligible probability.
    assert!(combine(&publisher, &partner).is_err());

    Ok(())
}

#[test]
fn steps_only_depend_on_the_counts() -> Result<(), Error> {
    let rule: AttributionRule = "last_click_1d".parse()?;
    let a = (
        vec![click(1, 100, 1), view(2, 200, 1)],
        vec![Conversion::new(10, 300, 1)],
    );
    let b = (
        vec![view(u32::MAX, 0, 5), click(0, u32::MAX, 6)],
        vec![Conversion::new(0, 0, 0)],
    );

    let mut steps = vec![];
    for (touchpoints, conversions) in [a, b] {
        let circuit = attribution_circuit(rule, touchpoints.len(), conversions.len())?;
        let publisher_input = PartyInput::Publisher(touchpoints).encode();
        let partner_input = PartyInput::Partner(conversions).encode();
        let (publisher, _) = Publisher::new(
            &circuit,
            &publisher_input,
            ChaCha20Rng::from_seed([1; 32]),
        )?;
        let partner = Partner::new(&circuit, partner_input, ChaCha20Rng::from_seed([2; 32]))?;
        assert_eq!(publisher.steps(), partner.steps());
        steps.push(publisher.steps());
    }
    assert_eq!(steps[0], steps[1]);

    Ok(())
}

#[test]
fn step_by_step_execution() -> Result<(), Error> {
    let rule: AttributionRule = "last_click_1d".parse()?;
    let touchpoints = vec![click(1, 100, 1), click(2, 200, 1)];
    let conversions = vec![Conversion::new(10, 300, 1)];
    let circuit = attribution_circuit(rule, touchpoints.len(), conversions.len())?;
    let publisher_input = PartyInput::Publisher(touchpoints).encode();
    let partner_input = PartyInput::Partner(conversions).encode();

    let (mut publisher, mut msg) = Publisher::new(
        &circuit,
        &publisher_input,
        ChaCha20Rng::from_seed([1; 32]),
    )?;
    let mut partner = Partner::new(&circuit, partner_input, ChaCha20Rng::from_seed([2; 32]))?;
    assert_eq!(publisher.steps() as usize, 3 + circuit.and_depth());
    assert_eq!(publisher.phase(), Phase::InputEncoding);

    let mut messages = 1;
    loop {
        let (next, reply) = partner.run(&msg)?;
        partner = next;
        messages += 1;
        let (next, reply) = publisher.run(&reply)?;
        publisher = next;
        match reply {
            Some(reply) => {
                assert_eq!(publisher.phase(), Phase::SecureEvaluation);
                messages += 1;
                msg = reply;
            }
            None => break,
        }
    }
    assert_eq!(messages, 2 * partner.steps());
    assert_eq!(publisher.phase(), Phase::ShareOutput);
    assert_eq!(partner.phase(), Phase::ShareOutput);

    let publisher = AttributionShares::from_output_shares(Role::Publisher, &publisher.output()?)?;
    let partner_shares = AttributionShares::from_output_shares(Role::Partner, &partner.output()?)?;
    assert_eq!(combine(&publisher, &partner_shares)?, vec![attributed(2)]);

    assert_eq!(partner.run(&msg).err(), Some(Error::ProtocolEnded));

    Ok(())
}

#[test]
fn parties_with_different_circuits_desync() -> Result<(), Error> {
    let rule: AttributionRule = "last_click_1d".parse()?;
    let publisher_circuit = attribution_circuit(rule, 2, 1)?;
    let partner_circuit = attribution_circuit(rule, 3, 1)?;
    let publisher_input = PartyInput::Publisher(vec![click(1, 1, 1), click(2, 2, 1)]).encode();
    let partner_input = PartyInput::Partner(vec![Conversion::new(1, 5, 1)]).encode();

    let (_, msg) = Publisher::new(
        &publisher_circuit,
        &publisher_input,
        ChaCha20Rng::from_seed([1; 32]),
    )?;
    let partner = Partner::new(
        &partner_circuit,
        partner_input,
        ChaCha20Rng::from_seed([2; 32]),
    )?;
    let err = partner.run(&msg).err().unwrap();
    assert_eq!(err, Error::InvalidMessageLength("InputShares"));
    assert!(err.is_desync());

    Ok(())
}

fn touchpoint_strategy() -> impl Strategy<Value = Touchpoint> {
    (0u32..8, 0u32..10_000, 0u32..3, any::<bool>()).prop_map(|(id, timestamp, ad_id, is_click)| {
        let kind = if is_click {
            TouchpointKind::Click
        } else {
            TouchpointKind::View
        };
        Touchpoint::new(id, timestamp, ad_id, kind)
    })
}

fn conversion_strategy() -> impl Strategy<Value = Conversion> {
    (0u32..100, 0u32..12_000, 0u32..3)
        .prop_map(|(id, timestamp, ad_id)| Conversion::new(id, timestamp, ad_id))
}

fn rule_strategy() -> impl Strategy<Value = AttributionRule> {
    prop_oneof![
        (1u32..4_000).prop_map(|window| AttributionRule::LastClick { window }),
        (1u32..4_000).prop_map(|window| AttributionRule::LastTouch { window }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn secure_attribution_matches_plaintext(
        rule in rule_strategy(),
        touchpoints in prop::collection::vec(touchpoint_strategy(), 0..4),
        conversions in prop::collection::vec(conversion_strategy(), 0..3),
    ) {
        let (publisher, partner) = simulate_attribution(rule, &touchpoints, &conversions).unwrap();
        prop_assert_eq!(
            combine(&publisher, &partner).unwrap(),
            attribute(rule, &touchpoints, &conversions)
        );
    }
}
