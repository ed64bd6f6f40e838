//! Factor corrections, the approval gate, apply semantics, and the
//! stable-numbers guard on verification.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use ghg_engine::models::{
    AssuranceLevel, CalculationMethod, Category, DataQuality, NewActivityRecord,
    NewEmissionFactor, RecalculationStatus, RecalculationTrigger, Scope, SourceType,
    VerificationState,
};
use ghg_engine::{EmissionEngine, EmissionFilter, EngineConfig, EngineError};

struct Fixture {
    engine: EmissionEngine,
    organization_id: Uuid,
    assessment_id: Uuid,
    category_id: Uuid,
    factor_id: Uuid,
    now: DateTime<Utc>,
}

/// One organization with 10,000 kWh calculated at 0.05 kgCO2e/kWh (500 kg)
async fn fixture() -> Fixture {
    let engine = EmissionEngine::new(EngineConfig::default());
    let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();

    let organization = engine.register_organization("Acme SAS", "FR", now).await;
    let assessment = engine
        .create_assessment(organization.id, 2024, now)
        .await
        .unwrap();
    let category_id = engine
        .register_category(
            Category::new(
                "electricity",
                "Purchased electricity",
                Scope::Scope2,
                None,
                CalculationMethod::ActivityBased,
            )
            .unwrap(),
        )
        .await;
    let (factor, _) = engine
        .publish_factor(factor_row(category_id, Decimal::new(5, 2), None), "initial", now)
        .await
        .unwrap();

    engine
        .submit_activity(
            NewActivityRecord {
                organization_id: organization.id,
                assessment_id: assessment.id,
                category_id,
                country: None,
                date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
                quantity: Decimal::new(10_000, 0),
                unit: "kWh".to_string(),
                source_type: SourceType::MeterReading,
                data_quality: DataQuality::Measured,
                metadata: Default::default(),
            },
            now,
        )
        .await
        .unwrap();
    engine.process_pending(now).await;

    Fixture {
        engine,
        organization_id: organization.id,
        assessment_id: assessment.id,
        category_id,
        factor_id: factor.id,
        now,
    }
}

fn factor_row(category_id: Uuid, co2e_per_unit: Decimal, corrects: Option<Uuid>) -> NewEmissionFactor {
    NewEmissionFactor {
        category_id,
        name: "Grid electricity FR".to_string(),
        source: "ademe".to_string(),
        source_id: None,
        unit: "kWh".to_string(),
        co2e_per_unit,
        co2_per_unit: None,
        ch4_per_unit: None,
        n2o_per_unit: None,
        uncertainty_percent: Decimal::new(10, 0),
        country: Some("FR".to_string()),
        valid_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        valid_until: None,
        corrects,
    }
}

#[tokio::test]
async fn test_significant_correction_raises_pending_event() {
    let f = fixture().await;

    // 0.05 -> 0.053 moves the assessment total by 6%
    let (_, raised) = f
        .engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(53, 3), Some(f.factor_id)),
            "corrected grid mix",
            f.now,
        )
        .await
        .unwrap();

    assert_eq!(raised.len(), 1);
    let event = &raised[0];
    assert_eq!(event.status, RecalculationStatus::Pending);
    assert_eq!(event.assessment_id, f.assessment_id);
    assert!((event.change_percent - 6.0).abs() < 1e-9);
    assert_eq!(event.previous_emissions_tco2e, Decimal::new(5, 1));
    assert_eq!(event.recalculated_emissions_tco2e, Decimal::new(53, 2));

    // Nothing applied yet: records and totals still show the old factor
    let records = f
        .engine
        .get_emissions(f.assessment_id, &EmissionFilter::default())
        .await;
    assert_eq!(records[0].co2e_kg, Decimal::new(500, 0));
}

#[tokio::test]
async fn test_insignificant_correction_raises_nothing() {
    let f = fixture().await;

    // 0.05 -> 0.0515 is a 3% change, below the 5% default
    let (_, raised) = f
        .engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(515, 4), Some(f.factor_id)),
            "minor revision",
            f.now,
        )
        .await
        .unwrap();
    assert!(raised.is_empty());
    assert!(f.engine.recalculation_events(f.assessment_id).await.is_empty());
}

#[tokio::test]
async fn test_organization_threshold_override() {
    let f = fixture().await;
    f.engine
        .set_recalculation_threshold(f.organization_id, 2.0)
        .await
        .unwrap();

    // The same 3% change clears the tightened 2% threshold
    let (_, raised) = f
        .engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(515, 4), Some(f.factor_id)),
            "minor revision",
            f.now,
        )
        .await
        .unwrap();
    assert_eq!(raised.len(), 1);
}

#[tokio::test]
async fn test_apply_supersedes_and_restates_totals() {
    let f = fixture().await;
    let (_, raised) = f
        .engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(53, 3), Some(f.factor_id)),
            "corrected grid mix",
            f.now,
        )
        .await
        .unwrap();
    let event_id = raised[0].id;

    let later = f.now + chrono::Duration::hours(1);
    f.engine
        .approve_recalculation(event_id, "sustainability-lead", later)
        .await
        .unwrap();
    let applied = f
        .engine
        .apply_recalculation(event_id, later)
        .await
        .unwrap();
    assert_eq!(applied.status, RecalculationStatus::Applied);
    assert_eq!(applied.applied_at, Some(later));

    // Current view: one replacement record at generation 1
    let current = f
        .engine
        .get_emissions(f.assessment_id, &EmissionFilter::default())
        .await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].generation, 1);
    assert_eq!(current[0].co2e_kg, Decimal::new(530, 0));
    assert_eq!(current[0].recalculation_event_id, Some(event_id));

    // Audit view: the superseded original is still there, linked forward
    let audit = f
        .engine
        .get_emissions(
            f.assessment_id,
            &EmissionFilter {
                include_superseded: true,
                ..Default::default()
            },
        )
        .await;
    assert_eq!(audit.len(), 2);
    let original = audit.iter().find(|r| r.generation == 0).unwrap();
    assert_eq!(original.superseded_by, Some(current[0].id));

    let totals = f.engine.get_totals(f.assessment_id, later).await.unwrap();
    assert_eq!(totals.total_tonnes, Decimal::new(53, 2));
}

#[tokio::test]
async fn test_rejected_event_changes_nothing() {
    let f = fixture().await;
    let (_, raised) = f
        .engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(53, 3), Some(f.factor_id)),
            "corrected grid mix",
            f.now,
        )
        .await
        .unwrap();
    let event_id = raised[0].id;

    let rejected = f
        .engine
        .reject_recalculation(event_id, "sustainability-lead", f.now)
        .await
        .unwrap();
    assert_eq!(rejected.status, RecalculationStatus::Rejected);

    let err = f.engine.apply_recalculation(event_id, f.now).await.unwrap_err();
    assert!(matches!(err, EngineError::EventNotApproved { .. }));

    let records = f
        .engine
        .get_emissions(f.assessment_id, &EmissionFilter::default())
        .await;
    assert_eq!(records[0].co2e_kg, Decimal::new(500, 0));
    assert_eq!(records[0].generation, 0);
}

#[tokio::test]
async fn test_apply_without_approval_is_rejected() {
    let f = fixture().await;
    let (_, raised) = f
        .engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(53, 3), Some(f.factor_id)),
            "corrected grid mix",
            f.now,
        )
        .await
        .unwrap();

    let err = f
        .engine
        .apply_recalculation(raised[0].id, f.now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EventNotApproved { .. }));
}

#[tokio::test]
async fn test_decision_on_decided_event_is_rejected() {
    let f = fixture().await;
    let (_, raised) = f
        .engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(53, 3), Some(f.factor_id)),
            "corrected grid mix",
            f.now,
        )
        .await
        .unwrap();
    let event_id = raised[0].id;
    f.engine
        .approve_recalculation(event_id, "lead", f.now)
        .await
        .unwrap();

    let err = f
        .engine
        .reject_recalculation(event_id, "other-lead", f.now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EventNotPending { .. }));
}

#[tokio::test]
async fn test_declared_methodology_change_is_material_by_declaration() {
    let f = fixture().await;
    let event = f
        .engine
        .declare_recalculation(
            f.organization_id,
            f.assessment_id,
            RecalculationTrigger::MethodologyChange,
            "moved flights from spend-based to distance-based",
            f.now,
        )
        .await
        .unwrap();
    assert_eq!(event.status, RecalculationStatus::Pending);
    assert!(event.trigger.is_always_material());
}

#[tokio::test]
async fn test_declared_change_reexecutes_against_current_catalog() {
    let f = fixture().await;

    // Methodology moves the category to a new factor basis: 0.10 kg/kWh
    // replaces the deactivated 0.05 row outright, not as a correction
    f.engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(1, 1), None),
            "distance-based methodology factor",
            f.now,
        )
        .await
        .unwrap();
    f.engine.deactivate_factor(f.factor_id).await.unwrap();

    let event = f
        .engine
        .declare_recalculation(
            f.organization_id,
            f.assessment_id,
            RecalculationTrigger::MethodologyChange,
            "moved electricity to the revised factor basis",
            f.now,
        )
        .await
        .unwrap();

    // The dry-run preview already reflects the re-resolution
    assert_eq!(event.previous_emissions_tco2e, Decimal::new(5, 1));
    assert_eq!(event.recalculated_emissions_tco2e, Decimal::new(1, 0));
    assert!((event.change_percent - 100.0).abs() < 1e-9);

    let later = f.now + chrono::Duration::hours(1);
    f.engine
        .approve_recalculation(event.id, "lead", later)
        .await
        .unwrap();
    f.engine.apply_recalculation(event.id, later).await.unwrap();

    // The record was superseded and recalculated under the new factor
    let current = f
        .engine
        .get_emissions(f.assessment_id, &EmissionFilter::default())
        .await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].generation, 1);
    assert_eq!(current[0].co2e_kg, Decimal::new(1000, 0));
    assert_eq!(current[0].recalculation_event_id, Some(event.id));

    let totals = f.engine.get_totals(f.assessment_id, later).await.unwrap();
    assert_eq!(totals.total_tonnes, Decimal::new(1, 0));
}

#[tokio::test]
async fn test_declared_change_with_unchanged_resolution_replaces_nothing() {
    let f = fixture().await;

    // The catalog still resolves every record to the same factor
    let event = f
        .engine
        .declare_recalculation(
            f.organization_id,
            f.assessment_id,
            RecalculationTrigger::ErrorCorrection,
            "audited the meter readings",
            f.now,
        )
        .await
        .unwrap();
    assert_eq!(
        event.previous_emissions_tco2e,
        event.recalculated_emissions_tco2e
    );

    let later = f.now + chrono::Duration::hours(1);
    f.engine
        .approve_recalculation(event.id, "lead", later)
        .await
        .unwrap();
    f.engine.apply_recalculation(event.id, later).await.unwrap();

    let current = f
        .engine
        .get_emissions(f.assessment_id, &EmissionFilter::default())
        .await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].generation, 0);
}

#[tokio::test]
async fn test_base_year_change_to_missing_year_names_the_year() {
    let f = fixture().await;
    let event = f
        .engine
        .declare_recalculation(
            f.organization_id,
            f.assessment_id,
            RecalculationTrigger::BaseYearChange { new_base_year: 2030 },
            "anticipated restructuring",
            f.now,
        )
        .await
        .unwrap();
    f.engine
        .approve_recalculation(event.id, "lead", f.now)
        .await
        .unwrap();

    let err = f.engine.apply_recalculation(event.id, f.now).await.unwrap_err();
    match err {
        EngineError::NoAssessmentForYear { organization_id, year } => {
            assert_eq!(organization_id, f.organization_id);
            assert_eq!(year, 2030);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_applied_notification_carries_before_and_after_totals() {
    let f = fixture().await;
    let mut rx = f.engine.subscribe();

    let (_, raised) = f
        .engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(53, 3), Some(f.factor_id)),
            "corrected grid mix",
            f.now,
        )
        .await
        .unwrap();
    let event_id = raised[0].id;
    let later = f.now + chrono::Duration::hours(1);
    f.engine
        .approve_recalculation(event_id, "lead", later)
        .await
        .unwrap();
    f.engine.apply_recalculation(event_id, later).await.unwrap();

    loop {
        match rx.recv().await.unwrap() {
            ghg_engine::EngineEvent::RecalculationApplied {
                records_replaced,
                previous_tco2e,
                recalculated_tco2e,
                ..
            } => {
                assert_eq!(records_replaced, 1);
                assert_eq!(previous_tco2e, Decimal::new(5, 1));
                assert_eq!(recalculated_tco2e, Decimal::new(53, 2));
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_pending_event_gates_verification_until_applied() {
    let f = fixture().await;
    f.engine
        .start_verification(f.assessment_id, AssuranceLevel::Limited, None, f.now)
        .await
        .unwrap();
    f.engine
        .advance_verification(
            f.assessment_id,
            VerificationState::InternalReview,
            None,
            None,
            f.now,
        )
        .await
        .unwrap();

    let (_, raised) = f
        .engine
        .publish_factor(
            factor_row(f.category_id, Decimal::new(53, 3), Some(f.factor_id)),
            "corrected grid mix",
            f.now,
        )
        .await
        .unwrap();
    let event_id = raised[0].id;

    // External verification is blocked while the event is pending
    let err = f
        .engine
        .advance_verification(
            f.assessment_id,
            VerificationState::ExternalVerification,
            None,
            None,
            f.now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PendingRecalculation { .. }));

    let later = f.now + chrono::Duration::hours(1);
    f.engine
        .approve_recalculation(event_id, "lead", later)
        .await
        .unwrap();
    f.engine.apply_recalculation(event_id, later).await.unwrap();

    // Numbers are stable again: the workflow proceeds to publication
    f.engine
        .advance_verification(
            f.assessment_id,
            VerificationState::ExternalVerification,
            Some("verifier-sa".to_string()),
            None,
            later,
        )
        .await
        .unwrap();
    f.engine
        .advance_verification(f.assessment_id, VerificationState::Verified, None, None, later)
        .await
        .unwrap();
    let record = f
        .engine
        .advance_verification(f.assessment_id, VerificationState::Published, None, None, later)
        .await
        .unwrap();
    assert_eq!(record.state, VerificationState::Published);
    assert_eq!(record.history.len(), 4);
}

#[tokio::test]
async fn test_base_year_lock_and_base_year_change_event() {
    let f = fixture().await;
    let snapshot = f
        .engine
        .set_base_year(f.organization_id, f.assessment_id, "first full inventory", f.now)
        .await
        .unwrap();
    assert_eq!(snapshot.base_year, 2024);
    assert_eq!(snapshot.total_emissions_tonnes, Decimal::new(5, 1));

    // A second direct declaration is locked out
    let err = f
        .engine
        .set_base_year(f.organization_id, f.assessment_id, "again", f.now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BaselineLocked { base_year: 2024, .. }));

    // Moving the base year goes through an approved recalculation event
    let assessment_2025 = f
        .engine
        .create_assessment(f.organization_id, 2025, f.now)
        .await
        .unwrap();
    let event = f
        .engine
        .declare_recalculation(
            f.organization_id,
            assessment_2025.id,
            RecalculationTrigger::BaseYearChange { new_base_year: 2025 },
            "divested the logistics arm",
            f.now,
        )
        .await
        .unwrap();
    let later = f.now + chrono::Duration::hours(1);
    f.engine
        .approve_recalculation(event.id, "lead", later)
        .await
        .unwrap();
    f.engine.apply_recalculation(event.id, later).await.unwrap();

    let baseline = f.engine.baseline(f.organization_id).await.unwrap();
    assert_eq!(baseline.base_year, 2025);
    assert_eq!(baseline.recalculation_event_id, Some(event.id));
    assert!(!f
        .engine
        .assessment(f.assessment_id)
        .await
        .unwrap()
        .is_base_year);
}
