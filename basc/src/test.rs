use crate::*;

mod pest;

pub fn parse_rule(
    rule: Rule,
    input: &str,
) -> Result<::pest::iterators::Pair<Rule>, Box<::pest::error::Error<Rule>>> {
    use ::pest::Parser;
    Ok(BasicParser::parse(rule, input)
        .map_err(Box::new)?
        .next()
        .unwrap())
}
