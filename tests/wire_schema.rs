// Schema validation tests for the MQTT wire format
//
// Payloads are produced by the library (parsers, status builders) and
// validated against the JSON Schema files in schemas/mqtt/. A few
// hand-written instances check that the schemas reject what consumers
// would choke on.

use facp_bridge::constants::field;
use facp_bridge::message::{ClientIdentity, Coordinates, ParsedEvent, RecordType, connected_status, last_will};
use facp_bridge::panels::{PanelModel, ReportOutcome};
use facp_bridge::severity::SeverityTable;
use serde_json::{Value, json};

fn load_schema(name: &str) -> Value {
    let path = format!("{}/schemas/mqtt/{name}", env!("CARGO_MANIFEST_DIR"));
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read schema {path}: {e}"));
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("Failed to parse schema {path}: {e}"))
}

fn build_validator(schema_name: &str) -> jsonschema::Validator {
    let schema = load_schema(schema_name);
    jsonschema::options()
        .with_retriever(LocalRetriever)
        .build(&schema)
        .unwrap_or_else(|e| panic!("Failed to compile schema {schema_name}: {e}"))
}

fn validate(schema_name: &str, instance: &Value) {
    let validator = build_validator(schema_name);
    let errors: Vec<_> = validator.iter_errors(instance).collect();
    if !errors.is_empty() {
        let msgs: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
        panic!(
            "Schema validation failed for {schema_name}:\n{}\nInstance: {}",
            msgs.join("\n"),
            serde_json::to_string_pretty(instance).unwrap()
        );
    }
}

fn validate_fails(schema_name: &str, instance: &Value) {
    let validator = build_validator(schema_name);
    assert!(
        !validator.is_valid(instance),
        "Expected schema validation to fail for {schema_name}, but it passed.\nInstance: {}",
        serde_json::to_string_pretty(instance).unwrap()
    );
}

// Retriever that loads $ref schemas from schemas/mqtt/
struct LocalRetriever;

impl jsonschema::Retrieve for LocalRetriever {
    fn retrieve(
        &self,
        uri: &jsonschema::Uri<&str>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        let uri_str = uri.as_str();
        let filename = uri_str
            .strip_prefix("json-schema:///")
            .unwrap_or(uri_str);
        let path = format!("{}/schemas/mqtt/{filename}", env!("CARGO_MANIFEST_DIR"));
        if std::path::Path::new(&path).exists() {
            let text = std::fs::read_to_string(&path)?;
            return Ok(serde_json::from_str(&text)?);
        }
        Err(format!("Cannot retrieve schema: {uri_str}").into())
    }
}

fn identity(model: PanelModel, coordinates: bool) -> ClientIdentity {
    ClientIdentity {
        client_id: "CLIENTE01".into(),
        panel_id: 7,
        panel_model_name: model.name().into(),
        panel_model_id: model.id(),
        coordinates: coordinates.then_some(Coordinates {
            latitude: -33.45,
            longitude: -70.66,
        }),
    }
}

fn event_payload(model: PanelModel, frame: &str, coordinates: bool) -> Value {
    let table = SeverityTable::new(999).with_levels(10001, [("FIRE ALARM", 6)]);
    let record = model
        .parse_event(frame)
        .unwrap_or_else(|| panic!("{} did not parse {frame:?}", model.name()));
    let severity = model.resolve_severity(&table, &record.code);
    let event = ParsedEvent::from_record(
        &identity(model, coordinates),
        RecordType::Event,
        record,
        Some(severity),
    );
    Value::Object(event.to_payload())
}

// ---------------------------------------------------------------------------
// Events and reports
// ---------------------------------------------------------------------------

#[test]
fn test_events_from_every_model() {
    let frames = [
        (
            PanelModel::EdwardsIo1000,
            "FIRE ALARM | 10:15:32 03/14/24 NODE:1 DEV:0023\nSMOKE DETECTOR 2ND FLOOR HALL\n",
        ),
        (
            PanelModel::EdwardsEst3x,
            "ALARM :: 14:02:11 03/14/24 :: 01020045 :: PULL STATION LOBBY\n",
        ),
        (PanelModel::NotifierNfs, "SYSTEM NORMAL\n"),
        (
            PanelModel::Simplex,
            "10:15:32 THU 14-MAR-24\n-1:M1-17 ALARM\n-SMOKE DETECTOR 3RD FLOOR EAST\n",
        ),
    ];
    for (model, frame) in frames {
        validate("event.schema.json", &event_payload(model, frame, false));
        validate("event.schema.json", &event_payload(model, frame, true));
    }
}

#[test]
fn test_event_field_order() {
    let payload = event_payload(
        PanelModel::EdwardsIo1000,
        "FIRE ALARM | 10:15:32 03/14/24 NODE:1\n",
        true,
    );
    let keys: Vec<&str> = payload.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec![
            field::CLIENT_ID,
            field::PANEL_ID,
            field::PANEL_MODEL,
            field::PANEL_MODEL_ID,
            field::MESSAGE,
            field::TYPE,
            field::SEVERITY,
            field::GATEWAY_TIME,
            field::PANEL_TIME,
            field::METADATA,
            field::LATITUDE,
            field::LONGITUDE,
            field::UNIQ,
        ]
    );
    assert_eq!(payload[field::SEVERITY], 6);
}

#[test]
fn test_unknown_code_uses_sentinel_severity() {
    let payload = event_payload(PanelModel::EdwardsEst3x, "WALK TEST :: :: 0001\n", false);
    assert_eq!(payload[field::SEVERITY], 999);
    assert!(payload.get(field::PANEL_TIME).is_none());
    validate("event.schema.json", &payload);
}

#[test]
fn test_io1000_report() {
    let report = "-----------------\nSYSTEM STATUS\n10:20:00 03/14/24\n-----------------\nALARMS: 0\n-----------------\nEND\n-----------------\n";
    let ReportOutcome::Parsed(record) = PanelModel::EdwardsIo1000.parse_report(report) else {
        panic!("report not parsed");
    };
    let event = ParsedEvent::from_record(
        &identity(PanelModel::EdwardsIo1000, false),
        RecordType::Report,
        record,
        None,
    );
    let payload = Value::Object(event.to_payload());
    assert_eq!(payload[field::TYPE], "Reporte");
    validate("event.schema.json", &payload);
}

#[test]
fn test_event_schema_rejects_bad_instances() {
    let good = event_payload(PanelModel::NotifierNfs, "SYSTEM NORMAL\n", false);
    validate("event.schema.json", &good);

    let mut missing_severity = good.clone();
    missing_severity.as_object_mut().unwrap().remove(field::SEVERITY);
    validate_fails("event.schema.json", &missing_severity);

    let mut bad_time = good.clone();
    bad_time[field::GATEWAY_TIME] = json!("2024-03-14T10:15:32Z");
    validate_fails("event.schema.json", &bad_time);

    let mut bad_severity = good.clone();
    bad_severity[field::SEVERITY] = json!(7);
    validate_fails("event.schema.json", &bad_severity);

    let mut extra = good.clone();
    extra["zone"] = json!(3);
    validate_fails("event.schema.json", &extra);

    let mut half_coordinates = good.clone();
    half_coordinates[field::LATITUDE] = json!(1.0);
    validate_fails("event.schema.json", &half_coordinates);

    let mut unknown_model = good;
    unknown_model[field::PANEL_MODEL_ID] = json!(20001);
    validate_fails("event.schema.json", &unknown_model);
}

// ---------------------------------------------------------------------------
// Status and last will
// ---------------------------------------------------------------------------

#[test]
fn test_status_payloads() {
    for coordinates in [false, true] {
        let id = identity(PanelModel::Simplex, coordinates);
        validate("status.schema.json", &Value::Object(connected_status(&id, true)));
        validate("status.schema.json", &Value::Object(connected_status(&id, false)));
        validate("status.schema.json", &Value::Object(last_will(&id)));
    }
}

#[test]
fn test_status_schema_rejects_event_type() {
    let id = identity(PanelModel::Simplex, false);
    let mut status = Value::Object(connected_status(&id, true));
    status[field::TYPE] = json!("Evento");
    validate_fails("status.schema.json", &status);
}

// ---------------------------------------------------------------------------
// Relay contacts and attribute requests
// ---------------------------------------------------------------------------

#[test]
fn test_relay_payload() {
    validate(
        "relay.schema.json",
        &json!({"alarm_relay": true, "trouble_relay": false}),
    );
    validate_fails("relay.schema.json", &json!({"alarm_relay": 1, "trouble_relay": false}));
    validate_fails("relay.schema.json", &json!({"alarm_relay": true}));
}

#[test]
fn test_attribute_request_payload() {
    validate(
        "attribute_request.schema.json",
        &json!({"sharedKeys": "id_modelo_panel", "clientKeys": "id_modelo_panel"}),
    );
    validate_fails(
        "attribute_request.schema.json",
        &json!({"sharedKeys": ["id_modelo_panel"], "clientKeys": "id_modelo_panel"}),
    );
}
