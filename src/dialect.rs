//! The standard dialect: the common Liquid tags, operators and filters,
//! registered through the same public API a third-party plug-in would use.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::ast::node::{Node, NodeData};
use crate::context::{Arity, Context, Fixness, TagKind};
use crate::render::{Control, Renderer};
use crate::value::Value;
use crate::variable::VariableStore;
use crate::variant::Variant;

enum Step {
    Key(String),
    Index(usize),
}

/// Registers the standard dialect into a context.
pub fn register_standard(context: &mut Context) {
    register_operators(context);
    register_tags(context);
    register_filters(context);
}

fn register_operators(context: &mut Context) {
    // `=` and `in` are structural: they only give assignment and loop
    // arguments an expression shape, the owning tag interprets them.
    context.register_operator("=", Arity::Binary, Fixness::Infix, 0, |_, _, _| Value::Nil);
    context.register_operator("in", Arity::Binary, Fixness::Infix, 0, |_, _, _| Value::Nil);

    context.register_operator("or", Arity::Binary, Fixness::Infix, 1, |r, node, store| {
        let left = r.child(node, store, 0);
        if left.is_truthy() {
            return Value::Bool(true);
        }
        Value::Bool(r.child(node, store, 1).is_truthy())
    });
    context.register_operator("and", Arity::Binary, Fixness::Infix, 2, |r, node, store| {
        let left = r.child(node, store, 0);
        if !left.is_truthy() {
            return Value::Bool(false);
        }
        Value::Bool(r.child(node, store, 1).is_truthy())
    });
    context.register_operator("not", Arity::Unary, Fixness::Prefix, 7, |r, node, store| {
        Value::Bool(!r.child(node, store, 0).is_truthy())
    });

    context.register_operator("==", Arity::Binary, Fixness::Infix, 4, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        Value::Bool(a.loose_eq(&b))
    });
    context.register_operator("!=", Arity::Binary, Fixness::Infix, 4, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        Value::Bool(!a.loose_eq(&b))
    });
    context.register_operator("<", Arity::Binary, Fixness::Infix, 4, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        Value::Bool(a.compare(&b) == Some(std::cmp::Ordering::Less))
    });
    context.register_operator(">", Arity::Binary, Fixness::Infix, 4, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        Value::Bool(a.compare(&b) == Some(std::cmp::Ordering::Greater))
    });
    context.register_operator("<=", Arity::Binary, Fixness::Infix, 4, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        Value::Bool(matches!(
            a.compare(&b),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ))
    });
    context.register_operator(">=", Arity::Binary, Fixness::Infix, 4, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        Value::Bool(matches!(
            a.compare(&b),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ))
    });
    context.register_operator(
        "contains",
        Arity::Binary,
        Fixness::Infix,
        4,
        |r, node, store| {
            let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
            let found = match &a {
                Value::String(haystack) => haystack.contains(&b.to_string()),
                Value::Array(items) => items.iter().any(|item| item.loose_eq(&b)),
                _ => false,
            };
            Value::Bool(found)
        },
    );

    context.register_operator("+", Arity::Binary, Fixness::Infix, 5, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        numeric_binary(&a, &b, i64::checked_add, |x, y| x + y)
    });
    context.register_operator("-", Arity::Binary, Fixness::Infix, 5, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        numeric_binary(&a, &b, i64::checked_sub, |x, y| x - y)
    });
    context.register_operator("*", Arity::Binary, Fixness::Infix, 6, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        numeric_binary(&a, &b, i64::checked_mul, |x, y| x * y)
    });
    context.register_operator("/", Arity::Binary, Fixness::Infix, 6, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        numeric_binary(&a, &b, i64::checked_div, |x, y| x / y)
    });
    context.register_operator("%", Arity::Binary, Fixness::Infix, 6, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        numeric_binary(&a, &b, i64::checked_rem, |x, y| x % y)
    });
}

fn register_tags(context: &mut Context) {
    let if_id = context.register_tag(
        "if",
        TagKind::Enclosed,
        Some(1),
        Some(1),
        |r, node, store| {
            if r.argument(node, store, 0).is_truthy() {
                return r.child(node, store, 1);
            }
            render_alternate_clauses(r, node, store)
        },
    );
    context.register_intermediate(if_id, "elsif", Some(1), Some(1));
    context.register_intermediate(if_id, "else", Some(0), Some(0));

    let unless_id = context.register_tag(
        "unless",
        TagKind::Enclosed,
        Some(1),
        Some(1),
        |r, node, store| {
            if !r.argument(node, store, 0).is_truthy() {
                return r.child(node, store, 1);
            }
            render_alternate_clauses(r, node, store)
        },
    );
    context.register_intermediate(unless_id, "else", Some(0), Some(0));

    let for_id = context.register_tag(
        "for",
        TagKind::Enclosed,
        Some(1),
        Some(1),
        |r, node, store| render_for(r, node, store),
    );
    context.register_intermediate(for_id, "else", Some(0), Some(0));

    context.register_tag("break", TagKind::Free, Some(0), Some(0), |r, _, _| {
        r.set_control(Control::Break);
        Value::Nil
    });
    context.register_tag("continue", TagKind::Free, Some(0), Some(0), |r, _, _| {
        r.set_control(Control::Continue);
        Value::Nil
    });

    context.register_tag(
        "assign",
        TagKind::Free,
        Some(1),
        Some(1),
        |r, node, store| {
            let Some(argument) = node.argument_items().first() else {
                return Value::Nil;
            };
            let NodeData::Operator(op_id, operands) = &argument.data else {
                return Value::Nil;
            };
            if r.context().operator_by_id(*op_id).symbol != "=" || operands.len() != 2 {
                return Value::Nil;
            }
            let NodeData::Variable(links) = &operands[0].data else {
                return Value::Nil;
            };
            let value = r.render_node(&operands[1], store);
            assign_chain(r, links, value, store);
            Value::Nil
        },
    );

    context.register_tag(
        "capture",
        TagKind::Enclosed,
        Some(1),
        Some(1),
        |r, node, store| {
            let Some(argument) = node.argument_items().first() else {
                return Value::Nil;
            };
            let NodeData::Variable(links) = &argument.data else {
                return Value::Nil;
            };
            let Some(NodeData::Literal(Variant::String(name))) =
                links.first().map(|link| &link.data)
            else {
                return Value::Nil;
            };
            let name = name.clone();
            let mut text = String::new();
            r.child(node, store, 1).render_to(&mut text);
            store.set_key(&name, Value::String(text));
            Value::Nil
        },
    );

    // The body still has to be well-formed; only its output is discarded.
    context.register_tag("comment", TagKind::Enclosed, Some(0), Some(0), |_, _, _| {
        Value::Nil
    });
}

/// Walks an enclosed tag's intermediate clauses, rendering the first one
/// that applies (`elsif` with a truthy condition, or `else`).
fn render_alternate_clauses(
    r: &mut Renderer<'_>,
    node: &Node,
    store: &mut dyn VariableStore,
) -> Value {
    for clause in node.children().iter().skip(2) {
        let NodeData::Tag(clause_id, _) = &clause.data else {
            continue;
        };
        let symbol = r.context().tag_by_id(*clause_id).symbol.clone();
        match symbol.as_str() {
            "elsif" => {
                if r.argument(clause, store, 0).is_truthy() {
                    return r.child(clause, store, 1);
                }
            }
            "else" => return r.child(clause, store, 1),
            _ => {}
        }
    }
    Value::Nil
}

fn render_for(r: &mut Renderer<'_>, node: &Node, store: &mut dyn VariableStore) -> Value {
    let Some(argument) = node.argument_items().first() else {
        return Value::Nil;
    };
    let NodeData::Operator(op_id, operands) = &argument.data else {
        return Value::Nil;
    };
    if r.context().operator_by_id(*op_id).symbol != "in" || operands.len() != 2 {
        return Value::Nil;
    }
    let NodeData::Variable(links) = &operands[0].data else {
        return Value::Nil;
    };
    let Some(NodeData::Literal(Variant::String(loop_var))) = links.first().map(|link| &link.data)
    else {
        return Value::Nil;
    };
    let loop_var = loop_var.clone();

    let items = match r.render_node(&operands[1], store) {
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    if items.is_empty() {
        return render_alternate_clauses(r, node, store);
    }

    let length = items.len();
    let mut out = String::new();
    for (index, item) in items.into_iter().enumerate() {
        store.set_key(&loop_var, item);
        store.set_key("forloop", forloop_metadata(index, length));
        r.child(node, store, 1).render_to(&mut out);
        if r.interrupted() {
            return Value::Nil;
        }
        match r.take_loop_control() {
            Control::Break | Control::Return => break,
            Control::Continue | Control::None => {}
        }
    }
    Value::String(out)
}

fn forloop_metadata(index: usize, length: usize) -> Value {
    let mut forloop = BTreeMap::new();
    forloop.insert("index".to_string(), Value::Int(index as i64 + 1));
    forloop.insert("index0".to_string(), Value::Int(index as i64));
    forloop.insert("first".to_string(), Value::Bool(index == 0));
    forloop.insert("last".to_string(), Value::Bool(index + 1 == length));
    forloop.insert("length".to_string(), Value::Int(length as i64));
    Value::Dict(forloop)
}

/// Writes `value` at the chain target. Chains longer than a single name
/// require the extended-assignment setting.
fn assign_chain(
    r: &mut Renderer<'_>,
    links: &[Node],
    value: Value,
    store: &mut dyn VariableStore,
) {
    let mut steps = Vec::with_capacity(links.len());
    for link in links {
        match r.render_node(link, store) {
            Value::Int(index) if index >= 0 => steps.push(Step::Index(index as usize)),
            Value::String(key) => steps.push(Step::Key(key)),
            _ => return,
        }
    }
    if steps.len() > 1 && !r.settings().extended_assignment {
        return;
    }
    let Some((last, parents)) = steps.split_last() else {
        return;
    };
    let mut current: &mut dyn VariableStore = store;
    for step in parents {
        current = match step {
            Step::Key(key) => match current.key_mut(key) {
                Some(child) => child,
                None => return,
            },
            Step::Index(index) => match current.index_mut(*index) {
                Some(child) => child,
                None => return,
            },
        };
    }
    match last {
        Step::Key(key) => {
            current.set_key(key, value);
        }
        Step::Index(index) => {
            current.set_index(*index, value);
        }
    }
}

fn register_filters(context: &mut Context) {
    context.register_filter("size", Some(0), Some(0), |r, node, store| {
        value_size(&r.operand(node, store))
    });
    context.register_filter("first", Some(0), Some(0), |r, node, store| {
        value_first(&r.operand(node, store))
    });
    context.register_filter("last", Some(0), Some(0), |r, node, store| {
        value_last(&r.operand(node, store))
    });

    context.register_filter("join", Some(0), Some(1), |r, node, store| {
        let operand = r.operand(node, store);
        let separator = match r.argument(node, store, 0) {
            Value::Nil => String::new(),
            other => other.to_string(),
        };
        match operand {
            Value::Array(items) => {
                Value::String(items.iter().map(|item| item.to_string()).join(&separator))
            }
            other => other,
        }
    });
    context.register_filter("split", Some(1), Some(1), |r, node, store| {
        let text = r.operand(node, store).to_string();
        let separator = r.argument(node, store, 0).to_string();
        let parts = if separator.is_empty() {
            text.chars().map(|c| Value::String(c.to_string())).collect()
        } else {
            text.split(&separator)
                .map(|part| Value::String(part.to_string()))
                .collect()
        };
        Value::Array(parts)
    });

    context.register_filter("upcase", Some(0), Some(0), |r, node, store| {
        Value::String(r.operand(node, store).to_string().to_uppercase())
    });
    context.register_filter("downcase", Some(0), Some(0), |r, node, store| {
        Value::String(r.operand(node, store).to_string().to_lowercase())
    });
    context.register_filter("capitalize", Some(0), Some(0), |r, node, store| {
        let text = r.operand(node, store).to_string();
        let mut chars = text.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        };
        Value::String(capitalized)
    });
    context.register_filter("strip", Some(0), Some(0), |r, node, store| {
        Value::String(r.operand(node, store).to_string().trim().to_string())
    });
    context.register_filter("append", Some(1), Some(1), |r, node, store| {
        let mut text = r.operand(node, store).to_string();
        text.push_str(&r.argument(node, store, 0).to_string());
        Value::String(text)
    });
    context.register_filter("prepend", Some(1), Some(1), |r, node, store| {
        let text = r.operand(node, store).to_string();
        let mut prefix = r.argument(node, store, 0).to_string();
        prefix.push_str(&text);
        Value::String(prefix)
    });
    context.register_filter("replace", Some(2), Some(2), |r, node, store| {
        let text = r.operand(node, store).to_string();
        let from = r.argument(node, store, 0).to_string();
        let to = r.argument(node, store, 1).to_string();
        Value::String(text.replace(&from, &to))
    });

    context.register_filter("default", Some(1), Some(1), |r, node, store| {
        let operand = r.operand(node, store);
        if operand.is_empty() || matches!(operand, Value::Bool(false)) {
            r.argument(node, store, 0)
        } else {
            operand
        }
    });

    context.register_filter("abs", Some(0), Some(0), |r, node, store| {
        match r.operand(node, store) {
            Value::Int(i) => Value::Int(i.abs()),
            Value::Float(f) => Value::Float(f.abs()),
            _ => Value::Nil,
        }
    });
    context.register_filter("plus", Some(1), Some(1), |r, node, store| {
        let (a, b) = (r.operand(node, store), r.argument(node, store, 0));
        numeric_binary(&a, &b, i64::checked_add, |x, y| x + y)
    });
    context.register_filter("minus", Some(1), Some(1), |r, node, store| {
        let (a, b) = (r.operand(node, store), r.argument(node, store, 0));
        numeric_binary(&a, &b, i64::checked_sub, |x, y| x - y)
    });
    context.register_filter("times", Some(1), Some(1), |r, node, store| {
        let (a, b) = (r.operand(node, store), r.argument(node, store, 0));
        numeric_binary(&a, &b, i64::checked_mul, |x, y| x * y)
    });
    context.register_filter("divided_by", Some(1), Some(1), |r, node, store| {
        let (a, b) = (r.operand(node, store), r.argument(node, store, 0));
        numeric_binary(&a, &b, i64::checked_div, |x, y| x / y)
    });
    context.register_filter("modulo", Some(1), Some(1), |r, node, store| {
        let (a, b) = (r.operand(node, store), r.argument(node, store, 0));
        numeric_binary(&a, &b, i64::checked_rem, |x, y| x % y)
    });

    // Dot filters win over dictionary keys at parse time, so a dictionary
    // property with the same name is honored here before falling back.
    context.register_dot_filter("size", |r, node, store| {
        dict_property_or(&r.operand(node, store), "size", value_size)
    });
    context.register_dot_filter("first", |r, node, store| {
        dict_property_or(&r.operand(node, store), "first", value_first)
    });
    context.register_dot_filter("last", |r, node, store| {
        dict_property_or(&r.operand(node, store), "last", value_last)
    });
}

fn dict_property_or(value: &Value, key: &str, fallback: fn(&Value) -> Value) -> Value {
    if let Value::Dict(entries) = value {
        if let Some(found) = entries.get(key) {
            return found.clone();
        }
    }
    fallback(value)
}

fn value_size(value: &Value) -> Value {
    let size = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Dict(entries) => entries.len(),
        _ => 0,
    };
    Value::Int(size as i64)
}

fn value_first(value: &Value) -> Value {
    match value {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Nil),
        Value::String(s) => s
            .chars()
            .next()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Nil),
        _ => Value::Nil,
    }
}

fn value_last(value: &Value) -> Value {
    match value {
        Value::Array(items) => items.last().cloned().unwrap_or(Value::Nil),
        Value::String(s) => s
            .chars()
            .last()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Nil),
        _ => Value::Nil,
    }
}

/// Integers stay integers; any float operand widens both sides. Integer
/// overflow, division by zero and non-numeric operands yield nil.
fn numeric_binary(
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match int_op(*x, *y) {
            Some(result) => Value::Int(result),
            None => Value::Nil,
        },
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => Value::Float(float_op(x, y)),
            _ => Value::Nil,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;
    use rstest::rstest;

    fn render(source: &str, store: &mut Value) -> String {
        let context = Context::with_standard_dialect();
        let template = context.parse(source).unwrap();
        Renderer::new(&context).render(&template, store).unwrap()
    }

    #[rstest]
    #[case("{{ 'hello' | upcase }}", "HELLO")]
    #[case("{{ 'HELLO' | downcase }}", "hello")]
    #[case("{{ 'hello' | capitalize }}", "Hello")]
    #[case("{{ '  x  ' | strip }}", "x")]
    #[case("{{ 'ab' | append: 'cd' }}", "abcd")]
    #[case("{{ 'cd' | prepend: 'ab' }}", "abcd")]
    #[case("{{ 'a-b-c' | replace: '-', '+' }}", "a+b+c")]
    #[case("{{ 'a,b,c' | split: ',' | size }}", "3")]
    #[case("{{ items | join: ', ' }}", "10, 20, 30")]
    #[case("{{ items | first }}", "10")]
    #[case("{{ items | last }}", "30")]
    #[case("{{ items | size }}", "3")]
    #[case("{{ items.size }}", "3")]
    #[case("{{ missing | default: 'fallback' }}", "fallback")]
    #[case("{{ name | default: 'fallback' }}", "World")]
    #[case("{{ 3 | plus: 4 }}", "7")]
    #[case("{{ 3 | minus: 4 }}", "-1")]
    #[case("{{ 3 | times: 4 }}", "12")]
    #[case("{{ 9 | divided_by: 2 }}", "4")]
    #[case("{{ 9 | divided_by: 0 }}", "")]
    #[case("{{ 9 | modulo: 2 }}", "1")]
    #[case("{{ 3.5 | plus: 1 }}", "4.5")]
    fn test_filters(#[case] source: &str, #[case] expected: &str) {
        let mut store = value!({ "items": [10, 20, 30], "name": "World" });
        assert_eq!(render(source, &mut store), expected);
    }

    #[rstest]
    #[case("{% if x > 1 %}big{% else %}small{% endif %}", 5, "big")]
    #[case("{% if x > 1 %}big{% else %}small{% endif %}", 1, "small")]
    #[case("{% if x == 1 %}one{% elsif x == 2 %}two{% else %}many{% endif %}", 2, "two")]
    #[case("{% if x == 1 %}one{% elsif x == 2 %}two{% else %}many{% endif %}", 9, "many")]
    #[case("{% unless x > 1 %}small{% else %}big{% endunless %}", 1, "small")]
    #[case("{% if x >= 1 and x <= 2 %}in{% endif %}", 2, "in")]
    #[case("{% if x == 1 or x == 5 %}hit{% endif %}", 5, "hit")]
    #[case("{% if not x %}falsy{% else %}truthy{% endif %}", 0, "truthy")]
    fn test_conditions(#[case] source: &str, #[case] x: i64, #[case] expected: &str) {
        let mut store = value!({});
        store.set_key("x", Value::Int(x));
        assert_eq!(render(source, &mut store), expected);
    }

    #[rstest]
    #[case("{% for i in items %}{{ i }},{% endfor %}", "1,2,3,")]
    #[case("{% for i in items %}{{ forloop.index }}{% endfor %}", "123")]
    #[case("{% for i in items %}{% if forloop.last %}{{ i }}{% endif %}{% endfor %}", "3")]
    #[case("{% for i in missing %}x{% else %}empty{% endfor %}", "empty")]
    #[case("{% for i in items %}{% if i == 2 %}{% break %}{% endif %}{{ i }}{% endfor %}", "1")]
    #[case(
        "{% for i in items %}{% if i == 2 %}{% continue %}{% endif %}{{ i }}{% endfor %}",
        "13"
    )]
    fn test_for(#[case] source: &str, #[case] expected: &str) {
        let mut store = value!({ "items": [1, 2, 3] });
        assert_eq!(render(source, &mut store), expected);
    }

    #[rstest]
    fn test_assign_and_capture() {
        let mut store = value!({});
        assert_eq!(
            render("{% assign x = 2 %}{{ x }}", &mut store),
            "2"
        );
        assert_eq!(
            render("{% capture greeting %}hi there{% endcapture %}{{ greeting }}", &mut store),
            "hi there"
        );
    }

    #[rstest]
    fn test_extended_assignment() {
        let context = Context::with_settings(crate::context::Settings {
            extended_assignment: true,
            ..Default::default()
        });
        let template = context.parse("{% assign a[1] = 9 %}{{ a[1] }}").unwrap();
        let mut store = value!({ "a": [0, 0] });
        let out = Renderer::new(&context).render(&template, &mut store).unwrap();
        assert_eq!(out, "9");

        // without the setting, indexed targets are ignored
        let plain = Context::with_standard_dialect();
        let template = plain.parse("{% assign a[1] = 9 %}{{ a[1] }}").unwrap();
        let mut store = value!({ "a": [0, 0] });
        let out = Renderer::new(&plain).render(&template, &mut store).unwrap();
        assert_eq!(out, "0");
    }

    #[rstest]
    #[case("{% if 'hello' contains 'ell' %}y{% endif %}", "y")]
    #[case("{% if items contains 2 %}y{% endif %}", "y")]
    #[case("{% if items contains 9 %}y{% else %}n{% endif %}", "n")]
    fn test_contains(#[case] source: &str, #[case] expected: &str) {
        let mut store = value!({ "items": [1, 2, 3] });
        assert_eq!(render(source, &mut store), expected);
    }

    #[rstest]
    fn test_comment_renders_nothing() {
        let mut store = value!({});
        assert_eq!(
            render("a{% comment %}ignored {{ 1 }}{% endcomment %}b", &mut store),
            "ab"
        );
    }
}
