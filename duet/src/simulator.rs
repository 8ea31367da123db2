//! Local execution of both parties, for tests and for benchmarking the protocol.

use crate::{
    reveal::AttributionShares,
    rules::{attribution_circuit, AttributionRule},
    states::{Partner, Publisher},
    Circuit, Conversion, Error, PartyInput, Role, Share, Touchpoint,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Simulates the local execution of the circuit using the 2 party protocol.
///
/// The computation is performed using the full cryptographic protocol exposed by the
/// [`Publisher`] and [`Partner`], exchanging their messages through local variables. This function
/// thus simulates an execution on a local machine under ideal network conditions.
///
/// Returns the output shares of the Publisher and of the Partner, in that order.
pub fn simulate(
    circuit: &Circuit,
    input_publisher: &[bool],
    input_partner: &[bool],
) -> Result<(Vec<Share<bool>>, Vec<Share<bool>>), Error> {
    let mut partner = Partner::new(circuit, input_partner, ChaCha20Rng::from_entropy())?;
    let (mut publisher, mut msg_for_partner) =
        Publisher::new(circuit, input_publisher, ChaCha20Rng::from_entropy())?;

    assert_eq!(publisher.steps(), partner.steps());

    for _ in 0..partner.steps() {
        let (next_state, msg_for_publisher) = partner.run(&msg_for_partner)?;
        partner = next_state;

        let (next_state, reply) = publisher.run(&msg_for_publisher)?;
        publisher = next_state;

        if let Some(reply) = reply {
            msg_for_partner = reply;
        }
    }
    Ok((publisher.output()?, partner.output()?))
}

/// Runs the whole attribution protocol locally and returns the shares of both parties.
///
/// The shares can be reconstructed using [`crate::reveal::combine`].
pub fn simulate_attribution(
    rule: AttributionRule,
    touchpoints: &[Touchpoint],
    conversions: &[Conversion],
) -> Result<(AttributionShares, AttributionShares), Error> {
    let circuit = attribution_circuit(rule, touchpoints.len(), conversions.len())?;
    let publisher_input = PartyInput::Publisher(touchpoints.to_vec()).encode();
    let partner_input = PartyInput::Partner(conversions.to_vec()).encode();
    let (publisher, partner) = simulate(&circuit, &publisher_input, &partner_input)?;
    Ok((
        AttributionShares::from_output_shares(Role::Publisher, &publisher)?,
        AttributionShares::from_output_shares(Role::Partner, &partner)?,
    ))
}
