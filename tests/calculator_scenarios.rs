use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use reino::commission::{default_provider, CommissionCalculator, RateTable, RotationTable};
use reino::domain::{normalize_asset_key, AssetKey};
use reino::store::{MutationOutcome, StateStore};
use reino::validation::validate_allocation;
use reino::{CalculatorApp, RecordingSink};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn attached() -> (Arc<StateStore>, Arc<CommissionCalculator>, reino::Subscription) {
    let store = Arc::new(StateStore::with_defaults());
    let calculator = Arc::new(CommissionCalculator::new(default_provider(
        Arc::new(RateTable::builtin()),
        Arc::new(RotationTable::builtin()),
    )));
    let attachment = calculator.attach(&store);
    (store, calculator, attachment)
}

#[test]
fn normalization_is_idempotent_for_every_builtin_product() {
    for (key, _) in RateTable::builtin().iter() {
        let again = normalize_asset_key(key.category(), key.product()).unwrap();
        assert_eq!(&again, key);
        let parsed: AssetKey = key.to_string().parse().unwrap();
        assert_eq!(&parsed, key);
    }

    let messy = normalize_asset_key("  RENDA   Fixa ", "cdb ").unwrap();
    assert_eq!(messy, normalize_asset_key("renda fixa", "CDB").unwrap());
}

#[test]
fn non_canonical_keys_cannot_be_built() {
    assert!(normalize_asset_key("Renda Fixa|CDB", "x").is_err());
    assert!(normalize_asset_key("Renda Fixa", "CDB:Pré").is_err());
    assert!(normalize_asset_key("  ", "CDB").is_err());
    assert!("renda fixa|cdb".parse::<AssetKey>().is_err());
    assert!(serde_json::from_str::<AssetKey>("\"renda fixa|cdb\"").is_err());

    let from_json: AssetKey = serde_json::from_str("\" Renda Fixa : CDB \"").unwrap();
    assert_eq!(from_json.to_string(), "renda fixa:cdb");
}

#[test]
fn allocation_for_unselected_asset_leaves_state_untouched() {
    let (store, _calculator, _attachment) = attached();
    store.set_patrimonio(dec!(100000), "test");
    store.add_selected_asset("Renda Fixa", "CDB", "test");
    store.set_allocation("Renda Fixa", "CDB", dec!(40000), "test");

    let before = store.get_all_allocations();
    let outcome = store.set_allocation("Renda Fixa", "LCI", dec!(10000), "test");
    assert!(outcome.is_rejected());
    assert_eq!(store.get_all_allocations(), before);
}

#[test]
fn removing_an_asset_clears_its_allocation() {
    let (store, _calculator, _attachment) = attached();
    store.set_patrimonio(dec!(100000), "test");
    store.add_selected_asset("Renda Fixa", "CDB", "test");
    store.set_allocation("Renda Fixa", "CDB", dec!(40000), "test");

    store.remove_selected_asset("Renda Fixa", "CDB", "test");
    let key = normalize_asset_key("Renda Fixa", "CDB").unwrap();
    assert!(!store.get_all_allocations().contains_key(&key));

    store.add_selected_asset("Renda Fixa", "CDB", "test");
    assert!(store.get_selected_assets().contains(&key));
    assert_eq!(store.get_allocation("Renda Fixa", "CDB"), None);
}

#[test]
fn total_is_exact_sum_of_breakdown() {
    let (store, calculator, _attachment) = attached();
    store.set_patrimonio(dec!(333333.33), "test");
    let picks = [
        ("Renda Fixa", "CDB", dec!(111111.11)),
        ("Renda Variável", "Ações", dec!(77777.77)),
        ("Fundos", "Multimercado", dec!(55555.55)),
        ("Outros", "Produto Inexistente", dec!(1234.56)),
    ];
    for (category, product, amount) in picks {
        store.add_selected_asset(category, product, "test");
        store.set_allocation(category, product, amount, "test");
    }

    for index in 1..=4 {
        store.set_rotation_index(index, "test");
        let result = calculator.latest();
        let sum: Decimal = result.breakdown.iter().map(|line| line.cost).sum();
        assert_eq!(result.total_annual_cost, sum);
        assert_eq!(result.breakdown.len(), 4);
    }
}

#[test]
fn unmatched_products_cost_zero() {
    let (store, calculator, _attachment) = attached();
    store.set_patrimonio(dec!(10000), "test");
    store.add_selected_asset("Cripto", "Bitcoin", "test");
    store.set_allocation("Cripto", "Bitcoin", dec!(10000), "test");

    let result = calculator.latest();
    assert_eq!(result.breakdown.len(), 1);
    assert!(result.breakdown[0].unmatched);
    assert_eq!(result.breakdown[0].cost, Decimal::ZERO);
    assert_eq!(result.total_annual_cost, Decimal::ZERO);
}

#[test]
fn cdb_scenario_costs_1250() {
    let (store, calculator, _attachment) = attached();
    store.set_patrimonio(dec!(100000), "test");
    store.add_selected_asset("Renda Fixa", "CDB", "test");
    store.set_allocation("Renda Fixa", "CDB", dec!(100000), "test");

    let result = calculator.latest();
    let key = normalize_asset_key("Renda Fixa", "CDB").unwrap();
    assert_eq!(result.cost_for(&key), Some(dec!(1250)));
    assert_eq!(result.total_annual_cost, dec!(1250));
}

#[test]
fn rotation_change_recomputes_once() {
    let (store, calculator, _attachment) = attached();
    store.set_patrimonio(dec!(100000), "test");
    store.add_selected_asset("Renda Variável", "Ações", "test");
    store.set_allocation("Renda Variável", "Ações", dec!(50000), "test");
    assert_eq!(calculator.latest().total_annual_cost, dec!(500));

    let fired = Arc::new(AtomicUsize::new(0));
    let totals = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let fired = fired.clone();
        let totals = totals.clone();
        calculator.subscribe(move |event| {
            fired.fetch_add(1, Ordering::SeqCst);
            totals.lock().unwrap().push(event.total);
        })
    };

    let outcome = store.set_rotation_index(3, "test");
    assert!(matches!(outcome, MutationOutcome::Applied));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(*totals.lock().unwrap(), vec![dec!(750)]);
}

#[test]
fn over_allocation_is_reported() {
    let mut fractions = BTreeMap::new();
    fractions.insert("A", dec!(0.7));
    fractions.insert("B", dec!(0.5));

    let validation = validate_allocation(&fractions, dec!(0.0001));
    assert!(!validation.result.is_valid);
    assert!(validation
        .result
        .errors
        .iter()
        .any(|e| e.contains("over-allocation")));
    assert_eq!(validation.total_percentage, dec!(1.2));
}

#[test]
fn full_flow_through_the_view() {
    let sink = Arc::new(RecordingSink::new());
    let app = CalculatorApp::builder()
        .rate_table(RateTable::builtin())
        .rotation_table(RotationTable::builtin())
        .view(sink.clone())
        .build()
        .unwrap();
    let bridge = app.bridge().unwrap();

    bridge.handle_input(reino::InputEvent::Patrimonio {
        raw: "R$ 100.000,00".to_string(),
    });
    bridge.handle_input(reino::InputEvent::ToggleAsset {
        category: "Renda Fixa".to_string(),
        product: "CDB".to_string(),
        selected: true,
    });
    bridge.handle_input(reino::InputEvent::Allocation {
        category: "Renda Fixa".to_string(),
        product: "CDB".to_string(),
        raw: "100.000".to_string(),
    });

    assert_eq!(
        sink.text(reino::bridge::elements::COMMISSION_TOTAL).as_deref(),
        Some("R$ 1.250,00")
    );
    assert_eq!(
        sink.text(reino::bridge::elements::ALLOCATED_PCT).as_deref(),
        Some("100,00%")
    );
    assert!(app.validate().is_valid());
}
