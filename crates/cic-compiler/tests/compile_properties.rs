//! End-to-end properties of whole-tree compilation

use cic_compiler::{CohortQueryBuilder, CompileError, Dialect};
use cic_model::{
    AggregateLeaf, Child, CohortConfiguration, ColumnRef, ConfigId, Container, ContainerId, Filter,
    FilterContainer, FilterOperator, LeafId, Node, NodeId, Parameter, SetOperation, TableRef,
};

fn leaf(id: u64, name: &str) -> AggregateLeaf {
    AggregateLeaf {
        id: LeafId(id),
        name: name.to_string(),
        table: TableRef {
            database: Some("biochem".to_string()),
            schema: None,
            name: name.to_lowercase(),
        },
        columns: vec![ColumnRef {
            table: None,
            column: "chi".to_string(),
        }],
        filters: None,
        having: None,
        disabled: false,
        parent: Some(ContainerId(1)),
    }
}

fn leaf_with_parameter(id: u64, name: &str, value: &str) -> AggregateLeaf {
    let mut l = leaf(id, name);
    l.filters = Some(
        FilterContainer::new(FilterOperator::And).with_filter(
            Filter::new("cause of death", "cause = @cause").with_parameter(Parameter::new(
                "@cause",
                "DECLARE @cause AS varchar(10);",
                value,
            )),
        ),
    );
    l
}

fn container(id: u64, operation: SetOperation, children: Vec<Child>) -> Container {
    Container::new(ContainerId(id), operation, children).unwrap()
}

fn config(root: Container) -> CohortConfiguration {
    CohortConfiguration {
        id: ConfigId(12),
        name: "test cohort".to_string(),
        description: None,
        parameters: vec![],
        root_container: Some(root),
    }
}

#[test]
fn compiling_twice_yields_identical_sql() {
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![
            Child::new(0, Node::Leaf(leaf_with_parameter(1, "Deaths", "'E11'"))),
            Child::new(1, Node::Leaf(leaf(2, "Admissions"))),
        ],
    ));

    let builder = CohortQueryBuilder::new(Dialect::MicrosoftSql);
    let first = builder.compile_configuration(&cfg, None).unwrap();
    let second = builder.compile_configuration(&cfg, None).unwrap();
    assert_eq!(first, second);
}

#[test]
fn resolved_buffer_is_reused_until_invalidated() {
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![Child::new(0, Node::Leaf(leaf_with_parameter(1, "Deaths", "'E11'")))],
    ));

    let mut builder = CohortQueryBuilder::new(Dialect::MicrosoftSql);
    let with_params = builder.sql_for_configuration(&cfg).unwrap().to_string();
    assert!(with_params.contains("DECLARE @cause"));

    builder.set_include_parameters(false);
    let body_only = builder.sql_for_configuration(&cfg).unwrap().to_string();
    assert!(!body_only.contains("DECLARE"));
    assert_ne!(with_params, body_only);
}

#[test]
fn rank_order_determines_textual_order() {
    // A has rank 5, B has rank 1: B must come first regardless of creation order
    let cfg = config(container(
        1,
        SetOperation::Except,
        vec![
            Child::new(5, Node::Leaf(leaf(1, "A"))),
            Child::new(1, Node::Leaf(leaf(2, "B"))),
        ],
    ));

    let sql = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap();

    let b_at = sql.find("/*cic_12_B*/").unwrap();
    let op_at = sql.find("EXCEPT").unwrap();
    let a_at = sql.find("/*cic_12_A*/").unwrap();
    assert!(b_at < op_at && op_at < a_at);
    assert_eq!(sql.matches("EXCEPT").count(), 1);
}

#[test]
fn reordering_siblings_never_changes_operators() {
    let forwards = config(container(
        1,
        SetOperation::Intersect,
        vec![
            Child::new(0, Node::Leaf(leaf(1, "A"))),
            Child::new(1, Node::Leaf(leaf(2, "B"))),
        ],
    ));
    let backwards = config(container(
        1,
        SetOperation::Intersect,
        vec![
            Child::new(1, Node::Leaf(leaf(1, "A"))),
            Child::new(0, Node::Leaf(leaf(2, "B"))),
        ],
    ));

    let builder = CohortQueryBuilder::new(Dialect::MicrosoftSql);
    let fwd = builder.compile_configuration(&forwards, None).unwrap();
    let bwd = builder.compile_configuration(&backwards, None).unwrap();

    assert_eq!(fwd.matches("INTERSECT").count(), 1);
    assert_eq!(bwd.matches("INTERSECT").count(), 1);
    assert!(fwd.find("/*cic_12_A*/").unwrap() < fwd.find("/*cic_12_B*/").unwrap());
    assert!(bwd.find("/*cic_12_B*/").unwrap() < bwd.find("/*cic_12_A*/").unwrap());
}

#[test]
fn oracle_spells_except_as_minus() {
    let cfg = config(container(
        1,
        SetOperation::Except,
        vec![
            Child::new(0, Node::Leaf(leaf(1, "A"))),
            Child::new(1, Node::Leaf(leaf(2, "B"))),
        ],
    ));

    let sql = CohortQueryBuilder::new(Dialect::Oracle)
        .compile_configuration(&cfg, None)
        .unwrap();
    assert!(sql.contains("MINUS"));
    assert!(!sql.contains("EXCEPT"));
}

#[test]
fn disabling_a_leaf_removes_its_block_and_parameters() {
    let mut first = leaf_with_parameter(1, "Deaths", "'E11'");
    first.disabled = true;

    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![
            Child::new(0, Node::Leaf(first)),
            Child::new(1, Node::Leaf(leaf(2, "Admissions"))),
            Child::new(2, Node::Leaf(leaf(3, "Prescriptions"))),
        ],
    ));

    let sql = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap();

    assert!(!sql.contains("Deaths"));
    assert!(!sql.contains("@cause"));
    // the first surviving child opens the block with no dangling operator
    assert!(sql.starts_with("(\n/*cic_12_Admissions*/"));
    assert_eq!(sql.matches("UNION").count(), 1);
}

#[test]
fn all_children_disabled_is_an_error() {
    let mut only = leaf(1, "Deaths");
    only.disabled = true;
    let cfg = config(container(1, SetOperation::Union, vec![Child::new(0, Node::Leaf(only))]));

    let err = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap_err();
    assert!(matches!(err, CompileError::NothingToCompile));
}

#[test]
fn empty_subcontainer_is_treated_as_absent() {
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![
            Child::new(0, Node::Leaf(leaf(1, "Deaths"))),
            Child::new(1, Node::Container(container(2, SetOperation::Intersect, vec![]))),
        ],
    ));

    let sql = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap();

    // one surviving block, so no operator keyword and no empty parens
    assert!(!sql.contains("UNION"));
    assert!(!sql.contains("INTERSECT"));
    assert!(!sql.contains("(\n)"));
}

#[test]
fn nested_containers_parenthesize_recursively() {
    let inner = container(
        2,
        SetOperation::Intersect,
        vec![
            Child::new(0, Node::Leaf(leaf(2, "Admissions"))),
            Child::new(1, Node::Leaf(leaf(3, "Prescriptions"))),
        ],
    );
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![
            Child::new(0, Node::Leaf(leaf(1, "Deaths"))),
            Child::new(1, Node::Container(inner)),
        ],
    ));

    let sql = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap();

    let union_at = sql.find("UNION").unwrap();
    let inner_open = sql[union_at..].find("(\n").unwrap() + union_at;
    let intersect_at = sql.find("INTERSECT").unwrap();
    assert!(union_at < inner_open && inner_open < intersect_at);
    assert!(sql.ends_with(")\n)"));
}

#[test]
fn identical_parameters_declare_once() {
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![
            Child::new(0, Node::Leaf(leaf_with_parameter(1, "Deaths", "'E11'"))),
            Child::new(1, Node::Leaf(leaf_with_parameter(2, "Admissions", "'E11'"))),
        ],
    ));

    let sql = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap();

    assert_eq!(sql.matches("DECLARE @cause AS varchar(10);").count(), 1);
    assert_eq!(sql.matches("SET @cause = 'E11';").count(), 1);
    assert_eq!(sql.matches("cause = @cause\n").count(), 2);
}

#[test]
fn conflicting_parameters_rename_with_suffix() {
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![
            Child::new(0, Node::Leaf(leaf_with_parameter(1, "Deaths", "'E11'"))),
            Child::new(1, Node::Leaf(leaf_with_parameter(2, "Admissions", "'I21'"))),
        ],
    ));

    let sql = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap();

    assert!(sql.contains("SET @cause = 'E11';"));
    assert!(sql.contains("DECLARE @cause_2 AS varchar(10);"));
    assert!(sql.contains("SET @cause_2 = 'I21';"));

    // each body references the name it was assigned, in rank order
    let deaths_at = sql.find("/*cic_12_Deaths*/").unwrap();
    let admissions_at = sql.find("/*cic_12_Admissions*/").unwrap();
    let original_ref = sql.rfind("cause = @cause\n").unwrap();
    let renamed_ref = sql.find("cause = @cause_2").unwrap();
    assert!(deaths_at < original_ref && original_ref < admissions_at);
    assert!(admissions_at < renamed_ref);
}

#[test]
fn global_parameters_are_declared_first() {
    let mut cfg = config(container(
        1,
        SetOperation::Union,
        vec![Child::new(0, Node::Leaf(leaf_with_parameter(1, "Deaths", "'E11'")))],
    ));
    cfg.parameters = vec![Parameter::new("@study_start", "DECLARE @study_start AS date;", "'2001-01-01'")];

    let sql = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap();

    let global_at = sql.find("DECLARE @study_start").unwrap();
    let query_level_at = sql.find("DECLARE @cause").unwrap();
    assert!(global_at < query_level_at);
}

#[test]
fn body_only_output_when_parameters_are_opted_out() {
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![Child::new(0, Node::Leaf(leaf_with_parameter(1, "Deaths", "'E11'")))],
    ));

    let mut builder = CohortQueryBuilder::new(Dialect::MicrosoftSql);
    builder.set_include_parameters(false);
    let sql = builder.compile_configuration(&cfg, None).unwrap();

    assert!(!sql.contains("DECLARE"));
    assert!(sql.starts_with("(\n/*cic_12_Deaths*/"));
    // the body still references the parameter
    assert!(sql.contains("cause = @cause"));
}

#[test]
fn early_termination_stops_after_the_target_sibling() {
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![
            Child::new(0, Node::Leaf(leaf(1, "Deaths"))),
            Child::new(1, Node::Leaf(leaf(2, "Admissions"))),
            Child::new(2, Node::Leaf(leaf(3, "Prescriptions"))),
        ],
    ));

    let sql = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, Some(NodeId::Leaf(LeafId(2))))
        .unwrap();

    assert!(sql.contains("/*cic_12_Deaths*/"));
    assert!(sql.contains("/*cic_12_Admissions*/"));
    assert!(!sql.contains("Prescriptions"));
    assert_eq!(sql.matches("UNION").count(), 1);
    assert!(sql.trim_end().ends_with(')'));
}

#[test]
fn stop_target_below_top_level_is_rejected() {
    let inner = container(
        2,
        SetOperation::Intersect,
        vec![Child::new(0, Node::Leaf(leaf(2, "Admissions")))],
    );
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![
            Child::new(0, Node::Leaf(leaf(1, "Deaths"))),
            Child::new(1, Node::Container(inner)),
        ],
    ));

    let err = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, Some(NodeId::Leaf(LeafId(2))))
        .unwrap_err();
    assert!(matches!(err, CompileError::StopTargetNotTopLevel(_)));
}

#[test]
fn unknown_stop_target_is_rejected() {
    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![Child::new(0, Node::Leaf(leaf(1, "Deaths")))],
    ));

    let err = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, Some(NodeId::Leaf(LeafId(99))))
        .unwrap_err();
    assert!(matches!(err, CompileError::StopTargetUnknown(_)));
}

#[test]
fn missing_root_container_is_rejected() {
    let cfg = CohortConfiguration {
        id: ConfigId(12),
        name: "rootless".to_string(),
        description: None,
        parameters: vec![],
        root_container: None,
    };

    let err = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap_err();
    assert!(matches!(err, CompileError::MissingRootContainer(ConfigId(12))));
}

#[test]
fn failing_leaves_are_reported_together() {
    // two broken leaves (valueless parameter, no columns) and one good one
    let mut valueless = leaf(1, "Broken");
    valueless.filters = Some(
        FilterContainer::new(FilterOperator::And).with_filter(
            Filter::new("bad", "cause = @cause").with_parameter(Parameter::new(
                "@cause",
                "DECLARE @cause AS varchar(10);",
                "",
            )),
        ),
    );
    let mut no_columns = leaf(2, "Empty");
    no_columns.columns.clear();

    let cfg = config(container(
        1,
        SetOperation::Union,
        vec![
            Child::new(0, Node::Leaf(valueless)),
            Child::new(1, Node::Leaf(no_columns)),
            Child::new(2, Node::Leaf(leaf(3, "Fine"))),
        ],
    ));

    let err = CohortQueryBuilder::new(Dialect::MicrosoftSql)
        .compile_configuration(&cfg, None)
        .unwrap_err();

    match err {
        CompileError::LeafFailures(failures) => {
            assert_eq!(failures.len(), 2);
            let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["Broken", "Empty"]);
        }
        other => panic!("expected LeafFailures, got {other:?}"),
    }
}

#[test]
fn standalone_leaf_compiles_with_its_own_parameters() {
    let leaf = leaf_with_parameter(1, "Deaths", "'E11'");
    let builder = CohortQueryBuilder::new(Dialect::MicrosoftSql);
    let sql = builder
        .compile_leaf(&leaf, cic_compiler::SelectMode::DistinctIdentifiers)
        .unwrap();

    assert!(sql.starts_with("DECLARE @cause AS varchar(10);\nSET @cause = 'E11';\n\n/*Deaths*/"));
    assert!(sql.contains("SELECT DISTINCT [chi]"));
}
