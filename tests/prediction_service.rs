mod common;

use common::{
    age_split_disorder_forest, constant_classifier, disorder_always, service_with,
    subclass_always,
};
use genoclass::labels::{DISORDER_LABELS, LabelError, PredictionResult, SUBCLASS_LABELS};
use genoclass::pipeline::{
    DISORDER_MODEL_ID, NO_INPUT_MESSAGE, PredictionError, PredictionResponse, SUBCLASS_MODEL_ID,
};
use serde_json::json;
use tempfile::tempdir;

fn single(response: PredictionResponse) -> PredictionResult {
    match response {
        PredictionResponse::Single(result) => result,
        PredictionResponse::Batch(results) => panic!("expected one result, got {results:?}"),
    }
}

#[test]
fn partial_record_yields_known_labels() {
    let dir = tempdir().unwrap();
    let (service, _) = service_with(dir.path(), &age_split_disorder_forest(), &subclass_always(2));

    let result = single(
        service
            .predict_payload(&json!({"Patient Age": 5, "Gender": 1}))
            .unwrap(),
    );

    assert_eq!(result.patient_id, 1);
    assert!(DISORDER_LABELS.contains(&result.disorder.as_str()));
    assert!(SUBCLASS_LABELS.contains(&result.subclass.as_str()));
    assert_eq!(result.disorder, "Mitochondrial genetic inheritance disorders");
}

#[test]
fn codes_map_to_exact_labels() {
    let dir = tempdir().unwrap();
    let (service, _) = service_with(dir.path(), &disorder_always(1), &subclass_always(4));

    let result = single(service.predict_payload(&json!({"Gender": 0})).unwrap());
    assert_eq!(result.disorder, "Multifactorial genetic inheritance disorders");
    assert_eq!(result.subclass, "Hemochromatosis");

    let encoded = serde_json::to_value(&result).unwrap();
    assert_eq!(
        encoded,
        json!({
            "Patient Id": 1,
            "Genetic Disorder": "Multifactorial genetic inheritance disorders",
            "Disorder Subclass": "Hemochromatosis"
        })
    );
}

#[test]
fn forest_follows_the_patient_age() {
    let dir = tempdir().unwrap();
    let (service, _) = service_with(dir.path(), &age_split_disorder_forest(), &subclass_always(0));

    let older = single(service.predict_payload(&json!({"Patient Age": 12})).unwrap());
    assert_eq!(older.disorder, "Single-gene inheritance diseases");

    // Missing age fills to 0 and so takes the left branch.
    let missing = single(service.predict_payload(&json!({"Gender": 1})).unwrap());
    assert_eq!(missing.disorder, "Mitochondrial genetic inheritance disorders");
}

#[test]
fn empty_payloads_are_rejected_with_the_no_input_message() {
    let dir = tempdir().unwrap();
    let (service, store) = service_with(dir.path(), &disorder_always(0), &subclass_always(0));

    for payload in [
        json!({}),
        json!([]),
        json!(null),
        json!(false),
        json!(0),
        json!(0.0),
        json!(""),
    ] {
        match service.predict_payload(&payload) {
            Err(PredictionError::InvalidRequest(msg)) => assert_eq!(msg, NO_INPUT_MESSAGE),
            other => panic!("unexpected outcome for {payload}: {other:?}"),
        }
    }
    for body in [&b""[..], &b"  \n"[..]] {
        let err = service.predict_body(body).unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), NO_INPUT_MESSAGE);
    }

    // Nothing was loaded on behalf of a rejected request.
    assert_eq!(store.fetches(), 0);
}

#[test]
fn malformed_bodies_are_client_errors() {
    let dir = tempdir().unwrap();
    let (service, _) = service_with(dir.path(), &disorder_always(0), &subclass_always(0));

    let err = service.predict_body(b"{\"Gender\": ").unwrap_err();
    assert!(err.is_client_error());
    assert!(err.to_string().starts_with("Invalid JSON payload"));

    let err = service
        .predict_payload(&json!({"Patient Age": "five"}))
        .unwrap_err();
    assert!(err.is_client_error());
    assert!(err.to_string().contains("Patient Age"));

    for scalar in [json!(42), json!(true), json!("Gender")] {
        let err = service.predict_payload(&scalar).unwrap_err();
        assert!(err.is_client_error());
        assert_ne!(err.to_string(), NO_INPUT_MESSAGE);
    }

    let err = service
        .predict_payload(&json!([{"Gender": 1}, "not a record"]))
        .unwrap_err();
    assert!(err.is_client_error());
    assert!(err.to_string().contains("Record 2"));
}

#[test]
fn unknown_class_code_fails_the_request() {
    let dir = tempdir().unwrap();
    let disorder = constant_classifier(DISORDER_MODEL_ID, &[0, 1, 99], 99);
    let (service, _) = service_with(dir.path(), &disorder, &subclass_always(0));

    let err = service.predict_payload(&json!({"Gender": 1})).unwrap_err();
    assert!(!err.is_client_error());
    assert!(matches!(
        err,
        PredictionError::UnknownLabelCode(LabelError::Incomplete { ref missing, .. })
            if missing == &vec![99]
    ));
}

#[test]
fn warm_up_detects_incomplete_label_tables() {
    let dir = tempdir().unwrap();
    let subclass = constant_classifier(SUBCLASS_MODEL_ID, &[0, 4, 12], 4);
    let (service, _) = service_with(dir.path(), &disorder_always(1), &subclass);

    let err = service.warm_up().unwrap_err();
    assert!(err.to_string().contains("12"), "{err}");
}

#[test]
fn arrays_are_classified_in_order_with_positional_ids() {
    let dir = tempdir().unwrap();
    let (service, _) = service_with(dir.path(), &age_split_disorder_forest(), &subclass_always(8));

    let response = service
        .predict_payload(&json!([
            {"Patient Age": 3},
            {"Patient Age": 40, "Patient Id": 9001},
            {"Patient Age": 11}
        ]))
        .unwrap();

    let PredictionResponse::Batch(results) = response else {
        panic!("expected a batch response");
    };
    let ids: Vec<i64> = results.iter().map(|r| r.patient_id).collect();
    assert_eq!(ids, vec![1, 9001, 3]);
    assert_eq!(results[0].disorder, "Mitochondrial genetic inheritance disorders");
    assert_eq!(results[1].disorder, "Single-gene inheritance diseases");
    assert!(results.iter().all(|r| r.subclass == "Tay-Sachs"));
}

#[test]
fn models_are_loaded_once_across_requests() {
    let dir = tempdir().unwrap();
    let (service, store) = service_with(dir.path(), &disorder_always(2), &subclass_always(3));

    service.warm_up().unwrap();
    assert_eq!(store.fetches(), 2);
    assert!(service.cache().is_loaded(DISORDER_MODEL_ID));
    assert!(service.cache().is_loaded(SUBCLASS_MODEL_ID));

    for _ in 0..5 {
        service.predict_payload(&json!({"Gender": 1})).unwrap();
    }
    assert_eq!(store.fetches(), 2);
}

#[test]
fn missing_and_mismatched_artifacts_are_server_errors() {
    let dir = tempdir().unwrap();
    let (service, _) = service_with(dir.path(), &disorder_always(0), &subclass_always(0));
    std::fs::remove_file(dir.path().join(format!("{SUBCLASS_MODEL_ID}.toml"))).unwrap();

    let err = service.predict_payload(&json!({"Gender": 1})).unwrap_err();
    assert!(matches!(err, PredictionError::ArtifactUnavailable { .. }));
    assert!(!err.is_client_error());

    let dir = tempdir().unwrap();
    let mut disorder = disorder_always(0);
    disorder.feature_names.swap(0, 1);
    let (service, _) = service_with(dir.path(), &disorder, &subclass_always(0));
    let err = service.predict_payload(&json!({"Gender": 1})).unwrap_err();
    assert!(matches!(err, PredictionError::ModelLoad { .. }));
}
