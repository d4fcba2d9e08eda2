use super::*;

fn config_with_fixed_delay(tool: &str, p: f64, value: u64) -> ChaosConfig {
    let mut tools = HashMap::new();
    tools.insert(
        tool.to_string(),
        ChaosRule {
            delay_ms: Some(Probabilistic {
                p,
                magnitude: ChaosMagnitude::Fixed { value },
            }),
            fail_rate: None,
            corrupt_rate: None,
        },
    );
    ChaosConfig {
        seed: 1,
        global: None,
        tools,
    }
}

#[test]
fn certain_delay_always_fires() {
    let engine = ChaosEngine::new(config_with_fixed_delay("read_file", 1.0, 500));
    assert_eq!(engine.delay("read_file"), 500);
}

#[test]
fn apply_records_seed_and_delay() {
    let engine = ChaosEngine::new(config_with_fixed_delay("read_file", 1.0, 500));
    let applied = engine.apply("read_file");
    assert_eq!(applied.seed, 1);
    assert_eq!(applied.delay_ms, Some(500));
}

#[test]
fn unknown_tool_has_no_effect() {
    let engine = ChaosEngine::new(config_with_fixed_delay("read_file", 1.0, 500));
    assert_eq!(engine.delay("write_file"), 0);
}

#[test]
fn same_config_and_seed_produce_identical_sequences() {
    let config = config_with_fixed_delay("read_file", 0.5, 500);
    let a = ChaosEngine::new(config.clone());
    let b = ChaosEngine::new(config);
    let seq_a: Vec<u64> = (0..20).map(|_| a.delay("read_file")).collect();
    let seq_b: Vec<u64> = (0..20).map(|_| b.delay("read_file")).collect();
    assert_eq!(seq_a, seq_b);
}

#[test]
fn tool_rule_overrides_global_rule() {
    let mut tools = HashMap::new();
    tools.insert(
        "write_file".to_string(),
        ChaosRule {
            fail_rate: Some(1.0),
            ..Default::default()
        },
    );
    let config = ChaosConfig {
        seed: 7,
        global: Some(ChaosRule {
            fail_rate: Some(0.0),
            ..Default::default()
        }),
        tools,
    };
    let engine = ChaosEngine::new(config);
    assert!(engine.should_fail("write_file"));
    assert!(!engine.should_fail("read_file"));
}

#[test]
fn zero_probability_never_fires() {
    let engine = ChaosEngine::new(config_with_fixed_delay("read_file", 0.0, 500));
    for _ in 0..50 {
        assert_eq!(engine.delay("read_file"), 0);
    }
}
