//! Subscription Replay Property Tests
//!
//! Whatever sequence of subscribe and unsubscribe calls a consumer makes,
//! reaching `Ready` sends exactly one subscribe frame per non-empty mode
//! holding exactly the desired set.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;

use flattrade_stream::{SubscriptionGroups, SubscriptionMode, SubscriptionToken, Ticker};

use common::{config, harness, wait_ready};

#[derive(Debug, Clone)]
enum Op {
    Subscribe(Vec<u8>, SubscriptionMode),
    Unsubscribe(Vec<u8>),
}

fn token(index: u8) -> SubscriptionToken {
    SubscriptionToken::new("NSE", format!("{}", 100 + u32::from(index)))
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let tokens = prop::collection::vec(0u8..8, 0..4);
    let mode = prop_oneof![
        Just(SubscriptionMode::Quote),
        Just(SubscriptionMode::FullDepth)
    ];
    prop_oneof![
        (tokens.clone(), mode).prop_map(|(t, m)| Op::Subscribe(t, m)),
        tokens.prop_map(Op::Unsubscribe),
    ]
}

type Model = BTreeMap<SubscriptionToken, SubscriptionMode>;

fn apply(ticker: &Ticker, model: &mut Model, op: &Op) {
    match op {
        Op::Subscribe(indices, mode) => {
            let tokens: Vec<_> = indices.iter().copied().map(token).collect();
            for t in &tokens {
                model.insert(t.clone(), *mode);
            }
            ticker.subscribe(tokens, *mode);
        }
        Op::Unsubscribe(indices) => {
            let tokens: Vec<_> = indices.iter().copied().map(token).collect();
            for t in &tokens {
                model.remove(t);
            }
            ticker.unsubscribe(tokens, None);
        }
    }
}

fn expected_groups(model: &Model) -> SubscriptionGroups {
    let pick = |mode| {
        model
            .iter()
            .filter(|(_, m)| **m == mode)
            .map(|(t, _)| t.clone())
            .collect::<Vec<_>>()
    };
    SubscriptionGroups {
        quote: pick(SubscriptionMode::Quote),
        full_depth: pick(SubscriptionMode::FullDepth),
    }
}

fn expected_frames(model: &Model) -> Vec<String> {
    let groups = expected_groups(model);
    groups
        .non_empty()
        .map(|(mode, tokens)| {
            let kind = match mode {
                SubscriptionMode::Quote => "t",
                SubscriptionMode::FullDepth => "d",
            };
            let key = tokens
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("#");
            format!(r#"{{"t":"{kind}","k":"{key}"}}"#)
        })
        .collect()
}

/// Frames written after the most recent identify frame.
fn frames_since_last_identify(sent: &[String]) -> Vec<String> {
    let start = sent
        .iter()
        .rposition(|f| f.starts_with(r#"{"t":"c","#))
        .map_or(0, |i| i + 1);
    sent[start..].to_vec()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ready_replays_desired_set(
        before in prop::collection::vec(op_strategy(), 0..24),
        during in prop::collection::vec(op_strategy(), 0..24),
    ) {
        runtime().block_on(async {
            let mut h = harness(config());
            let mut model = Model::new();

            for op in &before {
                apply(&h.ticker, &mut model, op);
            }
            assert!(h.transport.sent().is_empty());

            h.ticker.connect();
            wait_ready(&mut h.events).await;

            assert_eq!(h.ticker.subscriptions(), expected_groups(&model));
            assert_eq!(
                frames_since_last_identify(&h.transport.sent()),
                expected_frames(&model)
            );

            for op in &during {
                apply(&h.ticker, &mut model, op);
            }

            h.transport.remote_close();
            wait_ready(&mut h.events).await;
            tokio::time::sleep(Duration::from_millis(1)).await;

            assert_eq!(h.ticker.subscriptions(), expected_groups(&model));
            assert_eq!(
                frames_since_last_identify(&h.transport.sent()),
                expected_frames(&model)
            );
        });
    }
}
