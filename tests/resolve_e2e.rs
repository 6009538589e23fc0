use std::sync::Arc;

use polars::prelude::*;
use rowmatch::table::text_values;
use rowmatch::{
    EntityRule, ExternalReferenceRule, FailureCause, FoundMultiple, FoundNone, InMemoryCatalog,
    MappingMetadata, MatchFilter, OptionSetRule, Resolver, ResolverConfig, RuleSpec, Stage,
    TypeRule, TypeScope, ValidationKind,
};

fn contacts_table() -> DataFrame {
    df!(
        "Id" => ["c-ada", "c-alan-old", "c-alan-new"],
        "fullname" => ["Ada Lovelace", "Alan Turing", "ALAN TURING"],
        "createdon" => ["2021-03-01T09:00:00Z", "2020-01-01T09:00:00Z", "2023-06-01T09:00:00Z"],
        "statecode" => [0i64, 0, 0],
    )
    .unwrap()
}

fn catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog.register("dev_contact", contacts_table()).unwrap();
    catalog
        .register(
            "dev_GlobalOptionSetMetadata",
            df!(
                "EntityName" => ["contact", "contact"],
                "OptionSetName" => ["statuscode", "statuscode"],
                "Option" => [1i64, 2],
                "LocalizedLabel" => ["Active", "Inactive"],
            )
            .unwrap(),
        )
        .unwrap();
    catalog
        .register(
            "dev_py3_externalreference",
            df!(
                "shl_datasource" => ["payroll"],
                "shl_datasourcedetail" => ["employee_no"],
                "py3_externalreference" => ["E-1"],
                "regardingobjectid_entitytype" => ["contact"],
                "regardingobjectid" => ["c-ada"],
            )
            .unwrap(),
        )
        .unwrap();
    catalog
        .register(
            "dev_py3_title",
            df!(
                "py3_typeid" => ["t-dr"],
                "py3_name" => ["Dr"],
                "py3_parenttypeid" => ["titles"],
                "createdon" => ["2020-01-01T00:00:00Z"],
            )
            .unwrap(),
        )
        .unwrap();
    catalog
}

fn resolver() -> Resolver {
    Resolver::new(Arc::new(catalog()), ResolverConfig::default())
}

fn contact_rule() -> EntityRule {
    EntityRule::new("contact_by_name", "contact")
        .filter(MatchFilter::column("fullname", "name"))
        .output("Id", "contact_id")
}

fn text(frame: &DataFrame, column: &str) -> Vec<Option<String>> {
    text_values(frame, column).unwrap()
}

fn some(value: &str) -> Option<String> {
    Some(value.to_string())
}

fn single(frame: &DataFrame, column: &str, value: &str) -> DataFrame {
    let rows = frame
        .clone()
        .lazy()
        .filter(col(column).cast(DataType::String).eq(lit(value)))
        .collect()
        .unwrap();
    assert_eq!(rows.height(), 1, "expected one row where {column} = {value}");
    rows
}

#[test]
fn identical_rows_share_an_identity() {
    let data = df!(
        "name" => ["Ada Lovelace", "Ada Lovelace", "Ada Lovelace"],
        "city" => ["London", "London", "Paris"],
    )
    .unwrap();

    let out = resolver().run(&data, &MappingMetadata::default()).unwrap();
    let ids = text(&out, "row_id");
    assert_eq!(ids[0], ids[1]);
    assert_ne!(ids[0], ids[2]);
}

#[test]
fn return_null_match_fills_value_without_failures() {
    let resolver = resolver();
    let data = df!("name" => ["ada lovelace", "Grace Hopper"]).unwrap();
    let metadata = MappingMetadata::default().rule(RuleSpec::MatchToEntity(
        contact_rule().behaviour(FoundNone::ReturnNull, FoundMultiple::FailRow),
    ));

    let out = resolver.run(&data, &metadata).unwrap();
    let ada = single(&out, "name", "ada lovelace");
    assert_eq!(text(&ada, "contact_id"), vec![some("c-ada")]);
    let grace = single(&out, "name", "Grace Hopper");
    assert_eq!(text(&grace, "contact_id"), vec![None]);
    assert!(resolver.failures().is_empty());
}

#[test]
fn newest_policy_keeps_later_reference_row() {
    let resolver = resolver();
    let data = df!("name" => ["Alan Turing"]).unwrap();
    let metadata = MappingMetadata::default().rule(RuleSpec::MatchToEntity(
        contact_rule().behaviour(FoundNone::ReturnNull, FoundMultiple::Newest),
    ));

    let out = resolver.run(&data, &metadata).unwrap();
    assert_eq!(out.height(), 1);
    assert_eq!(text(&out, "contact_id"), vec![some("c-alan-new")]);
    assert!(resolver.failures().is_empty());
}

#[test]
fn optionset_label_matches_regardless_of_case() {
    let resolver = resolver();
    let data = df!("status" => ["active"]).unwrap();
    let metadata = MappingMetadata::default().rule(RuleSpec::MatchToOptionset(OptionSetRule::new(
        "status",
        "contact",
        "statuscode",
        "status",
        "status_code",
    )));

    let out = resolver.run(&data, &metadata).unwrap();
    assert_eq!(out.column("status_code").unwrap().dtype(), &DataType::Int64);
    assert_eq!(text(&out, "status_code"), vec![some("1")]);
    assert!(resolver.failures().is_empty());
}

#[test]
fn missing_external_reference_records_generic_failure() {
    let resolver = resolver();
    let data = df!("system" => ["payroll"], "employee" => ["E-404"]).unwrap();
    let metadata = MappingMetadata::default().rule(RuleSpec::MatchToExternalReference(
        ExternalReferenceRule::new("employee_ref", "system", "employee_no", "employee", "contact_id"),
    ));

    let out = resolver.run(&data, &metadata).unwrap();
    assert_eq!(text(&out, "contact_id"), vec![None]);
    assert!(out.get_column_index("regardingobjectid").is_none());
    assert!(out.get_column_index("system").is_some());
    assert!(out.get_column_index("employee").is_some());

    let failures = resolver.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].cause, FailureCause::NoMatch);
    assert_eq!(failures[0].validation, ValidationKind::MatchToExternalReference);
    assert_eq!(failures[0].stage, Stage::Matching);
    assert!(failures[0].error_message.contains("data source detail: employee_no"));
    assert_eq!(Some(failures[0].row_id.clone()), text(&out, "row_id")[0]);
}

#[test]
fn external_reference_resolves_known_key() {
    let resolver = resolver();
    let data = df!("system" => ["PAYROLL"], "employee" => ["e-1"]).unwrap();
    let metadata = MappingMetadata::default().rule(RuleSpec::MatchToExternalReference(
        ExternalReferenceRule::new("employee_ref", "system", "employee_no", "employee", "contact_id"),
    ));

    let out = resolver.run(&data, &metadata).unwrap();
    assert_eq!(text(&out, "contact_id"), vec![some("c-ada")]);
    assert!(resolver.failures().is_empty());
}

#[test]
fn fail_row_records_every_unmatched_row_once() {
    let resolver = resolver();
    let data = df!(
        "name" => [Some("Grace Hopper"), Some("Edsger Dijkstra"), None, Some("Ada Lovelace")],
    )
    .unwrap();
    let metadata = MappingMetadata::default().rule(RuleSpec::MatchToEntity(contact_rule()));

    let out = resolver.run(&data, &metadata).unwrap();
    let unmatched = out
        .clone()
        .lazy()
        .filter(col("contact_id").is_null().and(col("name").is_not_null()))
        .collect()
        .unwrap();
    let failures = resolver.failures();
    assert_eq!(failures.len(), unmatched.height());
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| f.cause == FailureCause::NoMatch));
    assert!(failures[0]
        .error_message
        .starts_with("No matching record can be found in the contact table"));
}

#[test]
fn fail_row_multiple_match_converges_with_one_failure() {
    let resolver = resolver();
    let data = df!(
        "name" => ["Alan Turing", "alan turing", "Ada Lovelace"],
        "source_line" => [1i64, 2, 3],
    )
    .unwrap();
    let metadata = MappingMetadata::default().rule(RuleSpec::MatchToEntity(contact_rule()));

    let out = resolver.run(&data, &metadata).unwrap();
    assert_eq!(out.height(), 3);
    assert_eq!(out.column("row_id").unwrap().n_unique().unwrap(), 3);
    let alan = single(&out, "source_line", "1");
    assert_eq!(text(&alan, "contact_id"), vec![some("c-alan-new")]);

    let failures = resolver.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| f.cause == FailureCause::MultipleMatch));
    assert_ne!(failures[0].row_id, failures[1].row_id);
}

#[test]
fn rules_chain_and_failed_rows_can_be_excluded() {
    let resolver = resolver();
    let data = df!(
        "name" => ["Ada Lovelace", "Grace Hopper"],
        "status" => ["ACTIVE", "retired"],
        "title" => ["dr", "Dr"],
    )
    .unwrap();
    let metadata = MappingMetadata::default()
        .rule(RuleSpec::MatchToOptionset(OptionSetRule::new(
            "status",
            "contact",
            "statuscode",
            "status",
            "status_code",
        )))
        .rule(RuleSpec::MatchToEntity(contact_rule()))
        .rule(RuleSpec::MatchToType(TypeRule::new(
            "title",
            "py3_title",
            "title",
            "title_id",
            TypeScope::Parent("titles".to_string()),
        )));

    let out = resolver.run(&data, &metadata).unwrap();
    assert_eq!(out.height(), 2);
    assert_eq!(text(&out, "title_id")[1], some("t-dr"));

    let failures = resolver.failures();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].stage, Stage::RowProcessing);
    assert_eq!(failures[1].validation, ValidationKind::MatchToEntity);

    let clean = resolver.exclude_failed(&out, "row_id").unwrap();
    assert_eq!(clean.height(), 1);
    assert_eq!(text(&clean, "contact_id"), vec![some("c-ada")]);
    assert_eq!(text(&clean, "status_code"), vec![some("1")]);
}

#[test]
fn metadata_and_catalog_load_from_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("test_contact.json"),
        r#"[
            {"Id": "c-1", "fullname": "Ada Lovelace", "createdon": "2021-01-01T00:00:00Z"},
            {"Id": "c-2", "fullname": "Alan Turing", "createdon": "2022-01-01T00:00:00Z"}
        ]"#,
    )
    .unwrap();
    let catalog = InMemoryCatalog::load_dir(dir.path()).unwrap();

    let metadata = MappingMetadata::from_json(
        r#"{
            "id_column": "record_id",
            "rules": [{
                "validation": "match_to_entity",
                "rule_name": "contact",
                "entity": "contact",
                "match_filters": [{"filter_on": "fullname", "filter_by_column": "name"}],
                "output_columns": [{"column_name_in_scrm": "Id", "output": "contact_id"}],
                "behaviour": {"found_none_behaviour": "sometimes", "found_multiple_behaviour": "newest"}
            }]
        }"#,
    )
    .unwrap();

    let resolver = Resolver::new(Arc::new(catalog), ResolverConfig::new("test"));
    let data = df!("name" => ["alan turing", "Nobody"]).unwrap();
    let out = resolver.run(&data, &metadata).unwrap();

    assert!(out.get_column_index("record_id").is_some());
    assert_eq!(text(&out, "contact_id")[0], some("c-2"));
    // Unknown found_none keyword falls back to fail_row.
    assert_eq!(resolver.failures().len(), 1);
    assert_eq!(
        Some(resolver.failures()[0].row_id.clone()),
        text(&out, "record_id")[1]
    );
}
