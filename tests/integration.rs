
use std::collections::BTreeMap;

use blockplate::{
    BlockplateError, Context, EvalErrorKind, Syntax, SyntaxErrorKind, Template, Value, compile,
};
use fixtures::{generate_random_whitespace, generate_random_whitespace_at_least_one, render};

#[test]
#[ntest::timeout(100)]
fn test_text_without_markers_is_unchanged() {
    let texts = [
        "",
        "plain text",
        "a // b { c } :* / d\n\tline two ✓",
        "fn main() {\n    println!('hi'); /* not a marker */\n}\n",
        "\r\n\r\n trailing spaces   ",
        r#"she said "hi {{ there }}" and "\" twice"#,
    ];
    for text in texts {
        assert_eq!(
            render(text, &Context::new()).unwrap(),
            text,
            "text without markers should render unchanged"
        );
    }
}

#[test]
#[ntest::timeout(100)]
fn test_basic_substitution() {
    let template = compile("{{ a }}").unwrap();

    let context = Context::new().insert("a", "5").to_owned();
    assert_eq!(template.render(&context).unwrap(), "5");

    let context = Context::new().insert("a", 5).to_owned();
    assert_eq!(template.render(&context).unwrap(), "5");
}

#[test]
#[ntest::timeout(100)]
fn test_basic_iteration() {
    assert_eq!(
        render("//: for i in range(1, 3)\nx{{i}}//!", &Context::new()).unwrap(),
        "x1x2"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_iteration_with_random_whitespace() {
    let template = format!(
        "//:{}for{}cat{}in{}cats{}:\nGreetings {{{{{}cat{}}}}}\n//!",
        generate_random_whitespace(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
    );

    let context = Context::new()
        .insert("cats", vec!["Tom", "Felix"])
        .to_owned();
    assert_eq!(
        render(&template, &context).unwrap(),
        "Greetings Tom\nGreetings Felix\n",
        "template was {template:?}"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_nested_iteration() {
    let template = "//: for row in range(2)\n//: for col in range(3)\n{{ row * 3 + col }}//!;//!";
    assert_eq!(render(template, &Context::new()).unwrap(), "012;345;");
}

#[test]
#[ntest::timeout(100)]
fn test_loop_variables_do_not_leak() {
    let err = render(
        "//: for i in range(2)\n/*: let inner = i :*///!{{ inner }}",
        &Context::new(),
    )
    .unwrap_err();
    assert!(
        matches!(err, BlockplateError::UndefinedVariable { ref variable_name, .. } if variable_name == "inner"),
        "unexpected error: {err:?}"
    );

    // The same name can be bound again by a sibling loop.
    assert_eq!(
        render(
            "//: for i in range(2)\n{{i}}//!-//: for i in ['a', 'b']\n{{i}}//!",
            &Context::new()
        )
        .unwrap(),
        "01-ab"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_outer_bindings_are_updated() {
    let template = "/*: count = 0 :*///: for word in words\n/*: count += len(word) :*///!{{ count }}";
    let context = Context::new()
        .insert("words", vec!["ab", "cde"])
        .to_owned();
    assert_eq!(render(template, &context).unwrap(), "5");
}

#[test]
#[ntest::timeout(100)]
fn test_unclosed_partial_fails_compile() {
    let err = compile("start\n//: for i in range(3)\n{{ i }}").unwrap_err();
    let BlockplateError::Syntax(err) = err else {
        panic!("expected a syntax error, got {err:?}");
    };
    assert_eq!((err.line, err.column), (2, 1));
    assert!(matches!(err.kind, SyntaxErrorKind::UnclosedBlock { .. }));
}

#[test]
#[ntest::timeout(100)]
fn test_quoted_marker_lookalike() {
    let template = compile(r#"/*: x = "{{not a var}}" :*/{{ x }}"#).unwrap();
    assert_eq!(template.render(&Context::new()).unwrap(), "{{not a var}}");
}

#[test]
#[ntest::timeout(100)]
fn test_undefined_variable() {
    let template = Template::builder()
        .name("greeting")
        .compile("Hello {{ name }}!")
        .unwrap();
    let err = template.render(&Context::new()).unwrap_err();

    assert_eq!(
        err.to_string(),
        "Undefined variable 'name' while rendering 'greeting'"
    );
    let BlockplateError::UndefinedVariable {
        variable_name,
        template_name,
        program,
    } = err
    else {
        panic!("expected an undefined variable error");
    };
    assert_eq!(variable_name, "name");
    assert_eq!(template_name.as_deref(), Some("greeting"));
    assert!(program.contains("emit_value(name)"));
}

#[test]
#[ntest::timeout(100)]
fn test_evaluation_error() {
    let template = Template::builder()
        .name("math")
        .compile("/*: x = 1 :*/{{ x + 'a' }}")
        .unwrap();
    let err = template.render(&Context::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Evaluation error while rendering 'math': unsupported operand types for '+': int and string"
    );
    assert!(matches!(
        err,
        BlockplateError::Evaluation {
            kind: EvalErrorKind::TypeMismatch { .. },
            ..
        }
    ));
}

#[test]
#[ntest::timeout(100)]
fn test_if_elif_else_chain() {
    let template = compile(
        "//: if n > 10\nbig//!//: elif n > 5\nmedium//!//: else if n > 0\nsmall//!//: else\nnone//!",
    )
    .unwrap();
    let outputs: Vec<String> = [20, 7, 1, 0]
        .into_iter()
        .map(|n| {
            let context = Context::new().insert("n", n).to_owned();
            template.render(&context).unwrap()
        })
        .collect();
    assert_eq!(outputs, vec!["big", "medium", "small", "none"]);
}

#[test]
#[ntest::timeout(100)]
fn test_orphan_else() {
    let err = compile("//: if a\nA//!\n//: else\nB//!").unwrap_err();
    assert!(matches!(
        err,
        BlockplateError::Syntax(ref e) if matches!(e.kind, SyntaxErrorKind::OrphanBranch { .. })
    ));
}

#[test]
#[ntest::timeout(100)]
fn test_filters_and_methods() {
    let context = Context::new()
        .insert("name", "world")
        .insert("items", vec!["a", "b", "c"])
        .to_owned();
    assert_eq!(
        render(
            "Hello {{ name | upper }}: {{ items | join(\", \") }} ({{ items.len() }})",
            &context
        )
        .unwrap(),
        "Hello WORLD: a, b, c (3)"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_nested_data() {
    let user: BTreeMap<&str, Value> = BTreeMap::from([
        ("name", Value::from("Jessica")),
        ("langs", Value::from(vec!["rust", "c"])),
    ]);
    let context = Context::new().insert("user", user).to_owned();
    assert_eq!(
        render(
            "{{ user.name }} writes //: for lang in user.langs\n[{{ lang }}]//!",
            &context
        )
        .unwrap(),
        "Jessica writes [rust][c]"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_statement_block_emits() {
    let template = "/*:\n    n = 5\n    while true {\n        n -= 1\n        if n < 2 { break }\n        emit(n, ' ')\n    }\n:*/done";
    assert_eq!(render(template, &Context::new()).unwrap(), "4 3 2 done");
}

#[test]
#[ntest::timeout(100)]
fn test_required_variables() {
    let template = compile(
        "/*: let shown = 0 :*///: for item in items\n{{ item }}{{ sep | default(',') }}//!{{ footer }}",
    )
    .unwrap();

    let context = Context::new();
    assert_eq!(template.required_variables(&context), vec!["items", "footer"]);

    let context = Context::new().insert("footer", "end").to_owned();
    assert_eq!(template.required_variables(&context), vec!["items"]);
}

#[test]
#[ntest::timeout(100)]
fn test_custom_syntax() {
    let syntax = Syntax::builder()
        .statement("<%", "%>")
        .partial("<%%", "%%>")
        .variable("${", "}")
        .quote('\'')
        .build();
    let template = Template::builder()
        .syntax(syntax)
        .compile("<% let x = 'a \"quoted\" %>' %>${x}<%% for i in range(2)\n${i}%%>")
        .unwrap();
    assert_eq!(
        template.render(&Context::new()).unwrap(),
        "a \"quoted\" %>01"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_syntax_error_display() {
    let err = Template::builder()
        .name("page")
        .compile("text\n  //: for a in xs\nbody")
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Syntax error in 'page' at line 2, column 3: unclosed partial block 'for a in xs' (expected '//!')"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_unterminated_string() {
    let err = compile("{{ \"open }}").unwrap_err();
    assert!(matches!(
        err,
        BlockplateError::Syntax(ref e) if e.kind == SyntaxErrorKind::UnterminatedString && (e.line, e.column) == (1, 4)
    ));
}

#[test]
#[ntest::timeout(100)]
fn test_invalid_script_position() {
    let err = compile("line\n/*:\nlet x = 1\nx = = 2\n:*/").unwrap_err();
    let BlockplateError::Syntax(err) = err else {
        panic!("expected a syntax error, got {err:?}");
    };
    assert_eq!((err.line, err.column), (4, 5));
    assert!(matches!(err.kind, SyntaxErrorKind::InvalidScript { .. }));
}

#[test]
#[ntest::timeout(100)]
fn test_dump_shows_program() {
    let template = compile("//: for i in xs:\n  {{ i }}\n//!").unwrap();
    assert_eq!(
        template.dump(),
        "for i in xs {\n    emit_literal(\"  \")\n    emit_value(i)\n    emit_literal(\"\\n\")\n}\n"
    );
    assert_eq!(template.program().to_string(), template.dump());
}

#[test]
#[ntest::timeout(100)]
fn test_render_does_not_touch_context() {
    let template = compile("/*: a = a + 1 :*/{{ a }}").unwrap();
    let context = Context::new().insert("a", 1).to_owned();
    assert_eq!(template.render(&context).unwrap(), "2");
    assert_eq!(template.render(&context).unwrap(), "2");
    assert_eq!(context.get("a"), Some(&Value::Int(1)));
}

#[test]
#[ntest::timeout(1000)]
fn test_templates_render_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Template>();

    let template = compile("//: for i in range(n)\n{{ i }}//!").unwrap();
    let outputs: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let template = &template;
                scope.spawn(move || {
                    let context = Context::new().insert("n", n).to_owned();
                    template.render(&context).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(outputs, vec!["", "0", "01", "012"]);
}

#[test]
#[ntest::timeout(1000)]
fn test_deep_nesting_is_a_syntax_error() {
    let template = format!("{{{{ {}1{} }}}}", "(".repeat(1000), ")".repeat(1000));
    let err = compile(template).unwrap_err();
    assert!(
        matches!(err, BlockplateError::Syntax(ref e) if matches!(e.kind, SyntaxErrorKind::InvalidScript { ref message } if message.contains("nested too deeply"))),
        "unexpected error: {err:?}"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_oversized_values_are_errors() {
    for source in ["{{ 'ab' * 9223372036854775807 }}", "{{ len(range(9223372036854775807)) }}"] {
        let err = render(source, &Context::new()).unwrap_err();
        assert!(
            matches!(err, BlockplateError::Evaluation { kind: EvalErrorKind::Overflow { .. }, .. }),
            "unexpected error for {source:?}: {err:?}"
        );
    }
}

#[test]
#[ntest::timeout(100)]
fn test_backslash_before_quote_in_text() {
    let context = Context::new().insert("x", 1).to_owned();
    assert_eq!(
        render(r#"path "C:\" then {{ x }}"#, &context).unwrap(),
        r#"path "C:\" then 1"#
    );
}
