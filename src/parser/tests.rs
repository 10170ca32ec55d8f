use super::*;
use crate::ast::*;

fn select(sql: &str) -> SelectStmt {
    match parse(sql).unwrap().body {
        QueryExpr::Select(s) => *s,
        other => panic!("expected select, got {:?}", other),
    }
}

fn ident(name: &str) -> ExprKind {
    ExprKind::Identifier(FieldKey::from_dotted(name))
}

#[test]
fn test_select_without_from() {
    let s = select("SELECT 1 AS ONE");
    assert_eq!(s.columns.len(), 1);
    assert_eq!(s.columns[0].alias.as_deref(), Some("ONE"));
    assert!(s.from.is_empty());
}

#[test]
fn test_trailing_comma_and_semicolon() {
    let s = select("SELECT d, seven, FROM R;");
    assert_eq!(s.columns.len(), 2);
    assert_eq!(s.from.len(), 1);
}

#[test]
fn test_precedence_shape() {
    let e = parse_expression("1 + 2 * 3").unwrap();
    let ExprKind::Binary { op, right, .. } = e.kind else {
        panic!("expected binary");
    };
    assert_eq!(op, BinaryOp::Add);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));

    let e = parse_expression("(1 + 2) * 3").unwrap();
    assert!(matches!(e.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn test_and_binds_tighter_than_or() {
    let e = parse_expression("a = 1 OR b = 2 AND c = 3").unwrap();
    let ExprKind::Binary { op, right, .. } = e.kind else {
        panic!("expected binary");
    };
    assert_eq!(op, BinaryOp::Or);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::And, .. }));
}

#[test]
fn test_predicates() {
    let e = parse_expression("x NOT BETWEEN 1 AND 5").unwrap();
    assert!(matches!(e.kind, ExprKind::Between { negated: true, .. }));
    let e = parse_expression("name LIKE 'a!%' ESCAPE '!'").unwrap();
    assert!(matches!(e.kind, ExprKind::Like { escape: Some(_), .. }));
    let e = parse_expression("d IN (1, 2, 3)").unwrap();
    assert!(matches!(e.kind, ExprKind::InList { ref list, .. } if list.len() == 3));
    let e = parse_expression("d NOT IN (SELECT d FROM S)").unwrap();
    assert!(matches!(e.kind, ExprKind::InSubquery { negated: true, .. }));
    let e = parse_expression("d IS NOT NULL").unwrap();
    assert!(matches!(e.kind, ExprKind::IsNull { negated: true, .. }));
    let e = parse_expression("d > ALL (SELECT d FROM S)").unwrap();
    assert!(matches!(
        e.kind,
        ExprKind::Quantified {
            quantifier: Quantifier::All,
            ..
        }
    ));
}

#[test]
fn test_calls_and_casts() {
    let e = parse_expression("COUNT(*)").unwrap();
    assert!(matches!(e.kind, ExprKind::Call { star: true, .. }));
    let e = parse_expression("count(DISTINCT seven)").unwrap();
    assert!(matches!(e.kind, ExprKind::Call { distinct: true, .. }));
    let e = parse_expression("CAST(d AS VARCHAR(20))").unwrap();
    assert!(matches!(
        e.kind,
        ExprKind::Cast { ref type_name, precision: Some((20, None)), .. } if type_name == "VARCHAR"
    ));
    let e = parse_expression("CONVERT(d, SQL_DOUBLE)").unwrap();
    assert!(matches!(e.kind, ExprKind::Cast { .. }));
    let e = parse_expression("LEFT(name, 3)").unwrap();
    assert!(matches!(e.kind, ExprKind::Call { ref name, .. } if name == "LEFT"));
    let e = parse_expression("IFDEFINED(nothere)").unwrap();
    assert!(matches!(e.kind, ExprKind::IfDefined(_)));
}

#[test]
fn test_case_expression() {
    let e = parse_expression("CASE WHEN d > 1 THEN 'big' ELSE 'small' END").unwrap();
    let ExprKind::Case { operand, whens, else_expr } = e.kind else {
        panic!("expected case");
    };
    assert!(operand.is_none());
    assert_eq!(whens.len(), 1);
    assert!(else_expr.is_some());
}

#[test]
fn test_negative_literal_folds() {
    let e = parse_expression("-5").unwrap();
    assert_eq!(e.kind, ExprKind::Literal(Literal::Integer(-5)));
    let e = parse_expression("-(-a)").unwrap();
    assert!(matches!(e.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
}

#[test]
fn test_joins() {
    let s = select("SELECT A.d FROM R A LEFT OUTER JOIN S B ON A.d = B.d CROSS JOIN R C");
    assert_eq!(s.from.len(), 1);
    let FromItem::Join { kind, left, on, .. } = &s.from[0] else {
        panic!("expected join");
    };
    assert_eq!(*kind, JoinKind::Cross);
    assert!(on.is_none());
    assert!(matches!(**left, FromItem::Join { kind: JoinKind::Left, on: Some(_), .. }));
}

#[test]
fn test_table_annotation() {
    let s = select("SELECT * FROM lists.R [ContainerFilter='AllFolders'] X");
    let FromItem::Table { name, alias, annotations, .. } = &s.from[0] else {
        panic!("expected table");
    };
    assert_eq!(name.to_string(), "lists.R");
    assert_eq!(alias.as_deref(), Some("X"));
    assert_eq!(
        annotations,
        &vec![("ContainerFilter".to_string(), Literal::String("AllFolders".into()))]
    );
}

#[test]
fn test_values_and_subquery() {
    let s = select("SELECT * FROM (VALUES (1, 'a'), (2, 'b')) V, (SELECT d FROM R) X");
    assert!(matches!(&s.from[0], FromItem::Values { rows, .. } if rows.len() == 2));
    assert!(matches!(&s.from[1], FromItem::Subquery { alias: Some(a), .. } if a == "X"));
}

#[test]
fn test_union_with_order_and_limit() {
    let stmt = parse("SELECT a FROM R UNION ALL SELECT b FROM S UNION ALL SELECT c FROM T ORDER BY a LIMIT 5").unwrap();
    let QueryExpr::SetOp(set) = stmt.body else {
        panic!("expected union");
    };
    assert_eq!(set.op, SetOp::UnionAll);
    assert_eq!(set.terms.len(), 3);
    assert_eq!(set.order_by.len(), 1);
    assert_eq!(set.limit, Some(Limit { count: 5, offset: None }));
}

#[test]
fn test_mixed_set_operators_nest() {
    let stmt = parse("SELECT a FROM R UNION SELECT a FROM S EXCEPT SELECT a FROM T").unwrap();
    let QueryExpr::SetOp(set) = stmt.body else {
        panic!("expected set op");
    };
    assert_eq!(set.op, SetOp::Except);
    assert!(matches!(&set.terms[0], QueryExpr::SetOp(inner) if inner.op == SetOp::Union));
}

#[test]
fn test_pivot_clause() {
    let s = select("SELECT seven, twelve, COUNT(*) AS C FROM R GROUP BY seven, twelve PIVOT C BY seven IN (0, 1 AS one, NULL)");
    let pivot = s.pivot.unwrap();
    assert_eq!(pivot.aggregates[0].0, "C");
    assert_eq!(pivot.by, "seven");
    let PivotValues::List(values) = pivot.values else {
        panic!("expected explicit list");
    };
    assert_eq!(values.len(), 3);
    assert_eq!(values[1].alias.as_deref(), Some("one"));
    assert_eq!(values[2].value, Literal::Null);
}

#[test]
fn test_parameters_and_with() {
    let stmt = parse(
        "PARAMETERS (X INTEGER DEFAULT 5, @@hidden VARCHAR)\n\
         WITH q AS (SELECT d FROM R) SELECT d FROM q WHERE d > X",
    )
    .unwrap();
    assert_eq!(stmt.parameters.len(), 2);
    assert_eq!(stmt.parameters[0].default, Some(Literal::Integer(5)));
    assert_eq!(stmt.with[0].name, "q");
}

#[test]
fn test_comments_are_skipped() {
    let s = select("SELECT d -- trailing\n/* block */ FROM R");
    assert_eq!(s.columns[0].expr.kind, ident("d"));
}

#[test]
fn test_syntax_error_position() {
    let err = parse("SELECT d\nFROM R WHERE").unwrap_err();
    assert!(err.message.starts_with("Syntax error"), "{}", err.message);
    assert_eq!(err.line, 2);
}

#[test]
fn test_span_of_select_item() {
    let source = "SELECT d,\n  seven FROM R";
    let s = select(source);
    assert_eq!(s.columns[1].expr.span.locate(source), (2, 2));
}
