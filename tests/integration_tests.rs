use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use brine::{
    value, Context, Control, InnerError, Optimizer, ParseError, Renderer, RenderErrorKind,
    Settings, TagKind, Value,
};
use rstest::{fixture, rstest};

#[fixture]
fn context() -> Context {
    Context::with_standard_dialect()
}

fn render(context: &Context, source: &str, store: &mut Value) -> String {
    let template = context.parse(source).unwrap();
    Renderer::new(context).render(&template, store).unwrap()
}

#[rstest]
#[case::interpolation("Hello, {{ name }}!", value!({ "name": "World" }), "Hello, World!")]
#[case::condition_true("{% if x > 1 %}big{% else %}small{% endif %}", value!({ "x": 5 }), "big")]
#[case::condition_false("{% if x > 1 %}big{% else %}small{% endif %}", value!({ "x": 1 }), "small")]
#[case::size_filter("{{ items | size }}", value!({ "items": [10, 20, 30] }), "3")]
#[case::for_loop(
    "{% for i in items %}{{ i }},{% endfor %}",
    value!({ "items": [1, 2, 3] }),
    "1,2,3,"
)]
#[case::chain(
    "{{ a.b[1].c }}",
    value!({ "a": { "b": [{ "c": "x" }, { "c": "y" }] } }),
    "y"
)]
#[case::chain_missing("{{ a.b[1].c }}", value!({ "a": { "b": [] } }), "")]
#[case::nested_blocks(
    "{% for i in items %}{% if i > 1 %}{{ i }}{% endif %}{% endfor %}",
    value!({ "items": [1, 2, 3] }),
    "23"
)]
#[case::whitespace_control(
    "a \n{%- if true -%} \nb{%- endif -%} \nc",
    value!({}),
    "abc"
)]
#[case::float_output("{{ price }}", value!({ "price": 2.5 }), "2.5")]
#[case::bool_output("{{ flag }}", value!({ "flag": true }), "true")]
#[case::string_literals("{{ 'single' }}/{{ \"double\" }}", value!({}), "single/double")]
fn test_scenarios(#[case] source: &str, #[case] mut store: Value, #[case] expected: &str) {
    let context = Context::with_standard_dialect();
    assert_eq!(render(&context, source, &mut store), expected);
}

#[rstest]
fn test_extended_expression_mode(context: Context) {
    let extended = Context::with_settings(Settings {
        extended_expression: true,
        ..Settings::default()
    });
    let mut store = value!({});
    assert_eq!(render(&extended, "{{ (1 + 2) * 3 }}", &mut store), "9");

    // default mode rejects the parenthesis in an output expression
    let error = context.parse("{{ (1 + 2) * 3 }}").unwrap_err();
    assert!(matches!(
        error.cause,
        InnerError::Parse(ParseError::InvalidSymbol(_, _))
    ));
    assert_eq!(error.span.start.column, 4);
}

#[rstest]
fn test_render_determinism(context: Context) {
    let template = context
        .parse("{% for i in items %}{{ i | times: 2 }};{% endfor %}{{ a.b }}")
        .unwrap();
    let mut renderer = Renderer::new(&context);
    let mut store = value!({ "items": [1, 2, 3], "a": { "b": "x" } });
    let first = renderer.render(&template, &mut store).unwrap();
    let second = renderer.render(&template, &mut store).unwrap();
    assert_eq!(first, second);
}

#[rstest]
fn test_short_circuit_skips_side_effects() {
    let mut context = Context::with_standard_dialect();
    let counter = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&counter);
    context.register_filter("bump", Some(0), Some(0), move |r, node, store| {
        seen.set(seen.get() + 1);
        r.operand(node, store)
    });

    let mut store = value!({});
    render(
        &context,
        "{% if false and (x | bump) %}a{% endif %}{% if true or (x | bump) %}b{% endif %}",
        &mut store,
    );
    assert_eq!(counter.get(), 0);

    render(&context, "{% if true and (x | bump) %}a{% endif %}", &mut store);
    assert_eq!(counter.get(), 1);
}

#[rstest]
fn test_render_depth_budget(context: Context) {
    let source = format!("{}x{}", "{% if true %}".repeat(30), "{% endif %}".repeat(30));
    let template = context.parse(&source).unwrap();
    let mut renderer = Renderer::new(&context);
    renderer.set_max_depth(10);
    let mut store = value!({});
    let error = renderer.render(&template, &mut store).unwrap_err();
    assert_eq!(error.kind, RenderErrorKind::ExceededDepth);
}

#[rstest]
fn test_time_budget_returns_partial(context: Context) {
    let template = context
        .parse("first{% for i in items %}{{ i }}{% endfor %}")
        .unwrap();
    let mut renderer = Renderer::new(&context);
    renderer.set_max_time(Some(Duration::ZERO));
    let mut store = value!({ "items": [1, 2, 3] });
    let error = renderer.render(&template, &mut store).unwrap_err();
    assert_eq!(error.kind, RenderErrorKind::ExceededTime);
    assert_eq!(error.partial, "first");
}

#[rstest]
fn test_return_control_unwinds_to_root() {
    let mut context = Context::with_standard_dialect();
    context.register_tag("halt", TagKind::Free, Some(0), Some(0), |r, _, _| {
        r.set_control(Control::Return);
        Value::Nil
    });
    let mut store = value!({});
    assert_eq!(render(&context, "a{% halt %}b{{ 1 }}c", &mut store), "a");
}

#[rstest]
fn test_custom_operator_and_dot_filter() {
    let mut context = Context::with_standard_dialect();
    context.register_operator("to", brine::Arity::Binary, brine::Fixness::Infix, 5, |r, node, store| {
        let (a, b) = (r.child(node, store, 0), r.child(node, store, 1));
        match (a, b) {
            (Value::Int(from), Value::Int(to)) => {
                Value::Array((from..=to).map(Value::Int).collect())
            }
            _ => Value::Nil,
        }
    });
    context.register_dot_filter("reversed", |r, node, store| {
        match r.operand(node, store) {
            Value::Array(mut items) => {
                items.reverse();
                Value::Array(items)
            }
            other => other,
        }
    });

    let mut store = value!({ "items": [1, 2, 3] });
    assert_eq!(
        render(&context, "{% for i in 1 to 3 %}{{ i }}{% endfor %}", &mut store),
        "123"
    );
    assert_eq!(render(&context, "{{ items.reversed }}", &mut store), "321");
}

#[rstest]
fn test_registration_is_last_write_wins() {
    let mut context = Context::with_standard_dialect();
    context.register_filter("upcase", Some(0), Some(0), |r, node, store| {
        let mut text = r.operand(node, store).to_string();
        text.push('!');
        Value::String(text)
    });
    let mut store = value!({});
    assert_eq!(render(&context, "{{ 'hi' | upcase }}", &mut store), "hi!");
}

#[rstest]
fn test_optimized_render_matches_plain(context: Context) {
    let source = "{% for i in items %}{{ i }}-{{ name | upcase }};{% endfor %}{{ a.b }}{{ 1 }}";
    let mut store = value!({ "items": [1, 2], "name": "w", "a": { "b": "x" } });

    let template = context.parse(source).unwrap();
    let plain = Renderer::new(&context)
        .render(&template, &mut store.clone())
        .unwrap();

    let mut template = context.parse(source).unwrap();
    let mut renderer = Renderer::new(&context);
    Optimizer::new(&mut renderer).optimize(&mut template, &mut store);
    let optimized = renderer.render(&template, &mut store).unwrap();

    assert_eq!(plain, optimized);
}

#[rstest]
fn test_assign_persists_across_blocks(context: Context) {
    let mut store = value!({});
    assert_eq!(
        render(
            &context,
            "{% assign total = 1 + 2 %}{% if total == 3 %}{{ total }}{% endif %}",
            &mut store
        ),
        "3"
    );
}

#[rstest]
fn test_unknown_filter_warning_keeps_operand(context: Context) {
    let template = context.parse("{{ name | frobnicate }}").unwrap();
    assert_eq!(template.warnings().len(), 1);
    let mut store = value!({ "name": "ok" });
    let out = Renderer::new(&context).render(&template, &mut store).unwrap();
    assert_eq!(out, "ok");
}

#[rstest]
fn test_error_positions_point_at_offender(context: Context) {
    let error = context.parse("text\n{% if x %}a{% endfor %}").unwrap_err();
    assert!(matches!(
        error.cause,
        InnerError::Parse(ParseError::UnexpectedEnd(_, _))
    ));
    assert_eq!(error.span.start.line, 2);
}
