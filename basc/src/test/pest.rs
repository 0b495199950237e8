use crate::parser::{BasicParser, Rule};
use ::pest::*;

#[test]
fn line_number() {
    parses_to! {
        parser: BasicParser,
        input: "140",
        rule: Rule::line_number,
        tokens: [line_number(0, 3)]
    };
}

#[test]
fn identifier_with_suffix() {
    parses_to! {
        parser: BasicParser,
        input: "RD$",
        rule: Rule::identifier,
        tokens: [identifier(0, 3)]
    };
    parses_to! {
        parser: BasicParser,
        input: "N%",
        rule: Rule::identifier,
        tokens: [identifier(0, 2)]
    };
}

#[test]
fn numbers() {
    parses_to! {
        parser: BasicParser,
        input: "42",
        rule: Rule::number,
        tokens: [number(0, 2)]
    };
    parses_to! {
        parser: BasicParser,
        input: "3.14",
        rule: Rule::number,
        tokens: [number(0, 4)]
    };
    parses_to! {
        parser: BasicParser,
        input: "1E5",
        rule: Rule::number,
        tokens: [number(0, 3)]
    };
    parses_to! {
        parser: BasicParser,
        input: ".5",
        rule: Rule::number,
        tokens: [number(0, 2)]
    };
}

#[test]
fn string_literal() {
    parses_to! {
        parser: BasicParser,
        input: "\"HELLO, WORLD\"",
        rule: Rule::string,
        tokens: [string(0, 14, [string_inner(1, 13)])]
    };
}

#[test]
fn print_statement_with_separators() {
    let pair = crate::test::parse_rule(Rule::print_stmt, "PRINT \"A\";B;").unwrap();
    let list = pair.into_inner().next().unwrap();
    assert_eq!(list.as_rule(), Rule::print_list);
    let rules: Vec<Rule> = list.into_inner().map(|p| p.as_rule()).collect();
    assert_eq!(
        rules,
        vec![
            Rule::print_item,
            Rule::print_sep,
            Rule::print_item,
            Rule::print_sep
        ]
    );
}

#[test]
fn if_with_then_line_number() {
    let pair = crate::test::parse_rule(Rule::statement, "IF A > 3 THEN 100").unwrap();
    let inner = pair.into_inner().next().unwrap();
    assert_eq!(inner.as_rule(), Rule::if_stmt);
    let mut pairs = inner.into_inner();
    assert_eq!(pairs.next().unwrap().as_rule(), Rule::expr);
    let clause = pairs.next().unwrap();
    assert_eq!(clause.as_rule(), Rule::then_clause);
    let target = clause.into_inner().next().unwrap();
    assert_eq!(target.as_rule(), Rule::line_ref);
    assert_eq!(target.as_str(), "100");
}

#[test]
fn if_then_else_statements() {
    let pair =
        crate::test::parse_rule(Rule::statement, "IF X THEN PRINT \"Y\" ELSE PRINT \"N\"")
            .unwrap();
    let inner = pair.into_inner().next().unwrap();
    let mut pairs = inner.into_inner();
    pairs.next().unwrap();
    let clause = pairs.next().unwrap();
    let parts: Vec<Rule> = clause.into_inner().map(|p| p.as_rule()).collect();
    assert_eq!(parts, vec![Rule::statements, Rule::statements]);
}

#[test]
fn for_with_step() {
    let pair =
        crate::test::parse_rule(Rule::statement, "FOR I = 10 TO 1 STEP -1").unwrap();
    let inner = pair.into_inner().next().unwrap();
    assert_eq!(inner.as_rule(), Rule::for_stmt);
    assert_eq!(inner.into_inner().count(), 4);
}

#[test]
fn data_items_allow_bare_strings() {
    let pair = crate::test::parse_rule(
        Rule::statement,
        "DATA SWORD OF ORDIN, 25, \"A, B\"",
    )
    .unwrap();
    let inner = pair.into_inner().next().unwrap();
    assert_eq!(inner.as_rule(), Rule::data_stmt);
    let items: Vec<String> = inner
        .into_inner()
        .map(|i| i.as_str().trim().to_string())
        .collect();
    assert_eq!(items, vec!["SWORD OF ORDIN", "25", "\"A, B\""]);
}

#[test]
fn crunched_keywords_parse() {
    // Applesoft accepts keyword runs without spaces.
    assert!(crate::test::parse_rule(Rule::statement, "FORI=1TO5").is_ok());
    assert!(crate::test::parse_rule(Rule::statement, "NEXTI").is_ok());
    assert!(crate::test::parse_rule(Rule::statement, "IFA=1THEN100").is_ok());
}

#[test]
fn on_goto_targets() {
    let pair = crate::test::parse_rule(Rule::statement, "ON K GOTO 100,200,300").unwrap();
    let inner = pair.into_inner().next().unwrap();
    assert_eq!(inner.as_rule(), Rule::on_goto_stmt);
    assert_eq!(inner.into_inner().count(), 4);
}

#[test]
fn onerr_is_not_on() {
    let pair = crate::test::parse_rule(Rule::statement, "ONERR GOTO 900").unwrap();
    let inner = pair.into_inner().next().unwrap();
    assert_eq!(inner.as_rule(), Rule::onerr_stmt);
}

#[test]
fn def_fn() {
    let pair = crate::test::parse_rule(Rule::statement, "DEF FN R(X) = X * 2").unwrap();
    let inner = pair.into_inner().next().unwrap();
    assert_eq!(inner.as_rule(), Rule::def_stmt);
}

#[test]
fn program_with_blank_lines() {
    use ::pest::Parser;
    let source = "10 PRINT \"A\"\n\n20 END\n";
    assert!(BasicParser::parse(Rule::program, source).is_ok());
}
