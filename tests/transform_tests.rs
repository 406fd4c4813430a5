use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::task::Poll;
use xslvm::{
    CollectingSink, Compiler, Content, Engine, EngineConfig, EventRecorder, OutputEvent,
    RuleBasedStylesheet, RunStatus, TemplateRule, TransformConfig, TransformError,
    Transformation, TreeNode, Value, XsltError,
};
use xslvm_datasource::NodeType;
use xslvm_datasource::tests::{MockNode, MockTree, MockTreeBuilder};
use xslvm_xslt::ast::{Avt, NumberDecl, SortClause, SortParameter, SortSpec};
use xslvm_xslt::testing::{Probe, ScriptedExpression as Expr, ScriptedPattern, ScriptedPatterns};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn transformation(
    body: &[Content<MockNode>],
    root: MockNode,
    stylesheet: RuleBasedStylesheet<MockNode>,
    patterns: ScriptedPatterns,
    config: TransformConfig,
) -> (Transformation<MockNode>, Rc<RefCell<EventRecorder>>) {
    init_logging();
    let program = Compiler::compile_template(body).expect("body compiles");
    let recorder = EventRecorder::shared();
    let engine = Engine::new(
        Rc::new(program),
        root,
        Rc::new(stylesheet),
        Rc::new(patterns),
        Rc::clone(&recorder),
    );
    (Transformation::new(engine, config), recorder)
}

fn run_body(body: &[Content<MockNode>], root: MockNode) -> Vec<OutputEvent> {
    let (mut run, recorder) = transformation(
        body,
        root,
        RuleBasedStylesheet::new(),
        ScriptedPatterns::new(),
        TransformConfig::default(),
    );
    assert_eq!(run.run().expect("transformation succeeds"), RunStatus::Finished);
    recorder.borrow().normalized()
}

fn text_of(events: &[OutputEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            OutputEvent::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn attribute(node: &MockNode, index: usize) -> String {
    node.attributes()
        .get(index)
        .map(TreeNode::string_value)
        .unwrap_or_default()
}

/// Elements `<row g=".." v=".."/>` under the root.
fn rows(values: &[(&str, &str)]) -> MockTree {
    let mut b = MockTreeBuilder::new();
    let root = b.root();
    for (g, v) in values {
        let row = b.element(root, "row");
        b.attribute(row, "g", g);
        b.attribute(row, "v", v);
    }
    b.build()
}

fn for_each_sorted(clauses: Vec<SortClause<MockNode>>) -> Vec<Content<MockNode>> {
    vec![Content::ForEach {
        select: Expr::child_elements().build(),
        sort: Some(Rc::new(SortSpec::new(clauses))),
        body: vec![Content::value_of(
            Expr::string_of("concat(@g, @v, ';')", |ctx| {
                format!("{}{};", attribute(&ctx.node, 0), attribute(&ctx.node, 1))
            })
            .build(),
        )],
    }]
}

fn group_key() -> SortClause<MockNode> {
    SortClause::new(Expr::string_of("@g", |ctx| attribute(&ctx.node, 0)).build())
}

fn value_key() -> SortClause<MockNode> {
    SortClause::new(
        Expr::number_of("number(@v)", |ctx| {
            attribute(&ctx.node, 1).trim().parse().unwrap_or(f64::NAN)
        })
        .build(),
    )
    .numeric()
}

#[test]
fn test_count_scenario_emits_paragraph_with_count() {
    let mut b = MockTreeBuilder::new();
    let root = b.root();
    let section = b.element(root, "section");
    for name in ["a", "b", "c"] {
        b.element(section, name);
    }
    let tree = b.build();
    let count = Expr::<MockNode>::number_of("count(*)", |ctx| {
        ctx.node
            .children()
            .filter(|child| child.node_type() == NodeType::Element)
            .count() as f64
    })
    .build();
    let body = vec![Content::element(
        "p",
        vec![Content::Number(Rc::new(NumberDecl::of_value(count)))],
    )];

    assert_eq!(
        run_body(&body, tree.node(section)),
        vec![
            OutputEvent::start("p"),
            OutputEvent::text("3"),
            OutputEvent::end("p"),
            OutputEvent::EndOutput,
        ]
    );
}

#[test]
fn test_descending_numeric_sort_is_stable() {
    let tree = rows(&[("a", "3"), ("b", "1"), ("c", "4"), ("d", "1"), ("e", "5")]);
    let body = for_each_sorted(vec![value_key().descending()]);
    assert_eq!(text_of(&run_body(&body, tree.root())), "e5;c4;a3;b1;d1;");
}

#[test]
fn test_secondary_key_orders_within_groups() {
    let data = [("b", "2"), ("a", "3"), ("b", "1"), ("a", "1"), ("c", "2")];
    let ascending = for_each_sorted(vec![group_key(), value_key()]);
    assert_eq!(
        text_of(&run_body(&ascending, rows(&data).root())),
        "a1;a3;b1;b2;c2;"
    );

    let reversed = for_each_sorted(vec![group_key().descending(), value_key()]);
    assert_eq!(
        text_of(&run_body(&reversed, rows(&data).root())),
        "c2;b1;b2;a1;a3;"
    );
}

#[test]
fn test_not_a_number_sorts_first() {
    let tree = rows(&[("a", "2"), ("b", "n/a"), ("c", "1")]);
    let body = for_each_sorted(vec![value_key()]);
    assert_eq!(text_of(&run_body(&body, tree.root())), "bn/a;c1;a2;");
}

#[test]
fn test_sort_order_can_come_from_a_template() {
    let tree = rows(&[("a", "1"), ("b", "3"), ("c", "2")]);
    let body = for_each_sorted(vec![value_key().with_dynamic(
        SortParameter::Order,
        Avt::expression(Expr::constant_string("$dir", "descending").build()),
    )]);
    assert_eq!(text_of(&run_body(&body, tree.root())), "b3;c2;a1;");
}

/// Rule dispatch and sorting with every evaluator call routed through `probe`.
fn report(probe: &Probe) -> (Vec<Content<MockNode>>, RuleBasedStylesheet<MockNode>) {
    let rule = TemplateRule::compile(
        vec![ScriptedPattern::named("row")],
        &[Content::element(
            "line",
            vec![
                Content::value_of(Expr::position().probed(probe).build()),
                Content::text(" of "),
                Content::value_of(Expr::last().probed(probe).build()),
            ],
        )],
    )
    .expect("rule compiles");
    let stylesheet = RuleBasedStylesheet::new().with_rule(None, rule);
    let body = vec![
        Content::ApplyTemplates {
            select: Some(Expr::child_elements().probed(probe).build()),
            mode: None,
            sort: Some(Rc::new(SortSpec::new(vec![value_key().descending()]))),
            params: Vec::new(),
        },
        Content::ForEach {
            select: Expr::child_elements().probed(probe).build(),
            sort: None,
            body: vec![Content::value_of(
                Expr::string_of("@g", |ctx| attribute(&ctx.node, 0))
                    .probed(probe)
                    .build(),
            )],
        },
    ];
    (body, stylesheet)
}

fn run_report(config: TransformConfig, pend_every: Option<usize>) -> (Vec<OutputEvent>, Probe) {
    let probe = Probe::new();
    if let Some(every) = pend_every {
        probe.inject_pending(every);
    }
    let tree = rows(&[("x", "2"), ("y", "9"), ("z", "4")]);
    let (body, stylesheet) = report(&probe);
    let (mut run, recorder) = transformation(
        &body,
        tree.root(),
        stylesheet,
        ScriptedPatterns::probed(&probe),
        config,
    );
    assert_eq!(run.run().expect("transformation succeeds"), RunStatus::Finished);
    let events = recorder.borrow().normalized();
    (events, probe)
}

#[test]
fn test_resumability_across_slice_budgets() {
    let (expected, _) = run_report(TransformConfig::default(), None);
    assert_eq!(text_of(&expected), "1 of 32 of 33 of 3xyz");

    for budget in 1..=16 {
        let config = TransformConfig::default()
            .with_engine(EngineConfig::default().with_slice_budget(budget));
        for every in [2, 3] {
            let (events, probe) = run_report(config, Some(every));
            assert_eq!(events, expected, "slice budget {budget}, pending every {every}");
            assert_eq!(probe.live(), 0, "leaked evaluator handles at budget {budget}");
        }
    }
}

#[test]
fn test_slice_limit_stops_and_resumes() {
    let probe = Probe::new();
    let tree = rows(&[("x", "2"), ("y", "9"), ("z", "4")]);
    let (body, stylesheet) = report(&probe);
    let config = TransformConfig::from_json_str(
        r#"{ "engine": { "slice_budget": 2 }, "max_slices": 3 }"#,
    )
    .expect("valid config");
    let (mut run, recorder) = transformation(
        &body,
        tree.root(),
        stylesheet,
        ScriptedPatterns::probed(&probe),
        config,
    );

    let err = run.run().expect_err("three slices are not enough");
    assert!(matches!(err, TransformError::SliceLimit { slices: 3 }));
    assert!(!run.is_finished());

    let status = loop {
        match run.run() {
            Ok(status) => break status,
            Err(TransformError::SliceLimit { .. }) => continue,
            Err(other) => panic!("unexpected error: {other}"),
        }
    };
    assert_eq!(status, RunStatus::Finished);
    assert!(run.slices() > 3);
    assert!(recorder.borrow().is_finished());
}

#[test]
fn test_blocked_transformation_reports_blocked() {
    let tree = rows(&[("x", "1")]);
    let available = Rc::new(Cell::new(false));
    let flag = Rc::clone(&available);
    let body = vec![Content::value_of(
        Expr::new("document('remote.xml')", move |_, host| {
            if flag.get() {
                Ok(Poll::Ready(Value::String("fetched".into())))
            } else {
                host.set_blocked();
                Ok(Poll::Pending)
            }
        })
        .build(),
    )];
    let (mut run, recorder) = transformation(
        &body,
        tree.root(),
        RuleBasedStylesheet::new(),
        ScriptedPatterns::new(),
        TransformConfig::default(),
    );

    assert_eq!(run.run().expect("blocking is not an error"), RunStatus::Blocked);
    available.set(true);
    assert_eq!(run.run().expect("transformation succeeds"), RunStatus::Finished);
    assert_eq!(text_of(&recorder.borrow().normalized()), "fetched");
}

#[test]
fn test_recursion_limit_is_fatal() {
    let tree = rows(&[("x", "1")]);
    let recurse = Compiler::compile_template(&[Content::CallTemplate {
        name: "again".into(),
        params: Vec::new(),
    }])
    .expect("template compiles");
    let stylesheet = RuleBasedStylesheet::new().with_named_template("again", recurse);
    let body = vec![Content::CallTemplate {
        name: "again".into(),
        params: Vec::new(),
    }];
    let config = TransformConfig::default()
        .with_engine(EngineConfig::default().with_max_recursion_depth(64));
    let (run, _recorder) = transformation(
        &body,
        tree.root(),
        stylesheet,
        ScriptedPatterns::new(),
        config,
    );
    let sink = CollectingSink::new().shared();
    let mut run = run.with_message_sink(Rc::clone(&sink));

    let err = run.run().expect_err("unbounded recursion fails");
    assert!(matches!(
        err,
        TransformError::Engine(XsltError::RecursionLimit { depth: 64 })
    ));
    assert_eq!(run.engine().depth(), 0);
    assert_eq!(sink.borrow().errors().len(), 1);
    assert!(matches!(
        run.run(),
        Err(TransformError::Engine(XsltError::Finished))
    ));
}

#[test]
fn test_built_in_rules_through_stylesheet_driver() {
    init_logging();
    let mut b = MockTreeBuilder::new();
    let root = b.root();
    let doc = b.element(root, "doc");
    b.text(doc, "one ");
    b.text(doc, "two ");
    b.comment(doc, "skipped");
    b.text_element(doc, "b", "three");
    let tree = b.build();

    let recorder = EventRecorder::shared();
    let mut run = Transformation::for_stylesheet(
        tree.root(),
        Rc::new(RuleBasedStylesheet::new()),
        Rc::new(ScriptedPatterns::new()),
        Rc::clone(&recorder),
        TransformConfig::default(),
    )
    .expect("dispatch program builds");

    assert_eq!(run.run().expect("transformation succeeds"), RunStatus::Finished);
    assert_eq!(
        recorder.borrow().events,
        vec![
            OutputEvent::text("one two "),
            OutputEvent::text("three"),
            OutputEvent::EndOutput,
        ]
    );
}
