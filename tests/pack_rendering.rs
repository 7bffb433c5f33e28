use std::cell::RefCell;

use context_assembly::pack::{build_request, expand, merge, ExpansionPlan, StopReason, DEFAULT_LIMIT};
use context_assembly::template::TemplateContext;
use context_assembly::types::{
    AssemblyError, Block, ContextPack, ContextRetrieverRequest, CorpusDeclaration, Declarations,
    RetrievalError, RetrieverDeclaration,
};
use serde_json::{json, Map, Value};

fn request(limit: usize) -> ContextRetrieverRequest {
    ContextRetrieverRequest {
        query: "q".to_string(),
        offset: 0,
        limit,
        maximum_total_characters: None,
        max_tokens: None,
        metadata: Map::new(),
    }
}

fn full_page(req: &ContextRetrieverRequest) -> ContextPack {
    let blocks = (0..req.limit)
        .map(|i| Block::new(format!("item-{}", req.offset + i), "xx"))
        .collect();
    ContextPack::from_blocks(blocks, " ")
}

fn handbook_declarations() -> Declarations {
    Declarations::new()
        .with_corpus(
            CorpusDeclaration::new("handbook")
                .with("split", "train")
                .with("limit", 8)
                .with("maximum_total_characters", 100)
                .with("backend", "bm25"),
        )
        .with_retriever(
            RetrieverDeclaration::new("docs")
                .with("corpus", "handbook")
                .with("query", "{input.query} docs")
                .with("limit", 4)
                .with("max_characters_per_source", 50),
        )
}

// ------------------------------------------------------------
// merge
// ------------------------------------------------------------

#[test]
fn invariant_merge_single_pack_is_unchanged() {
    let pack = ContextPack {
        text: "alpha\n--\nbeta".to_string(),
        evidence_count: 2,
        blocks: vec![Block::new("a", "alpha"), Block::new("b", "beta")],
    };
    for join in ["", " | ", "\n\n"] {
        assert_eq!(merge(std::slice::from_ref(&pack), join).text, pack.text);
    }
}

#[test]
fn invariant_merge_flattens_blocks_in_order() {
    let first = ContextPack::from_blocks(vec![Block::new("a", "alpha"), Block::new("b", "beta")], "\n");
    let text_only = ContextPack::from_text("gamma");
    let empty = ContextPack::empty();

    let merged = merge(&[first, empty, text_only], " | ");
    assert_eq!(merged.text, "alpha | beta | gamma");
    assert_eq!(merged.evidence_count, 3);

    let ids: Vec<&str> = merged.blocks.iter().map(|b| b.evidence_item_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "pack:2"]);
}

#[test]
fn invariant_merge_of_nothing_is_empty() {
    assert_eq!(merge(&[], "\n"), ContextPack::empty());
    assert_eq!(merge(&[ContextPack::empty(), ContextPack::empty()], "\n"), ContextPack::empty());
}

// ------------------------------------------------------------
// expansion
// ------------------------------------------------------------

#[test]
fn invariant_single_page_plan_calls_once() {
    let calls = RefCell::new(Vec::new());
    let retriever = |req: &ContextRetrieverRequest| -> Result<ContextPack, RetrievalError> {
        calls.borrow_mut().push(req.offset);
        Ok(full_page(req))
    };

    let plan = ExpansionPlan {
        max_pages: 1,
        min_fill_ratio: 1.0,
        target_chars: Some(10_000),
    };
    let expanded = expand(&retriever, request(3), &plan).unwrap();

    assert_eq!(*calls.borrow(), vec![0]);
    assert_eq!(expanded.pages, 1);
    assert_eq!(expanded.stop, StopReason::PageCap);

    let expanded = expand(&retriever, request(3), &ExpansionPlan::single_page()).unwrap();
    assert_eq!(expanded.pages, 1);
}

#[test]
fn invariant_pages_advance_offset_by_limit() {
    let calls = RefCell::new(Vec::new());
    let retriever = |req: &ContextRetrieverRequest| -> Result<ContextPack, RetrievalError> {
        calls.borrow_mut().push(req.offset);
        Ok(full_page(req))
    };

    let plan = ExpansionPlan {
        max_pages: 3,
        min_fill_ratio: 1.0,
        target_chars: Some(1_000),
    };
    let expanded = expand(&retriever, request(2), &plan).unwrap();

    assert_eq!(*calls.borrow(), vec![0, 2, 4]);
    assert_eq!(expanded.stop, StopReason::PageCap);
    assert_eq!(expanded.pack.evidence_count, 6);
    let ids: Vec<&str> = expanded.pack.blocks.iter().map(|b| b.evidence_item_id.as_str()).collect();
    assert_eq!(ids, vec!["item-0", "item-1", "item-2", "item-3", "item-4", "item-5"]);
}

#[test]
fn invariant_short_page_signals_exhaustion() {
    let calls = RefCell::new(0);
    let retriever = |_: &ContextRetrieverRequest| -> Result<ContextPack, RetrievalError> {
        *calls.borrow_mut() += 1;
        Ok(ContextPack::from_blocks(vec![Block::new("only", "xx")], "\n"))
    };

    let plan = ExpansionPlan {
        max_pages: 5,
        min_fill_ratio: 1.0,
        target_chars: Some(1_000),
    };
    let expanded = expand(&retriever, request(3), &plan).unwrap();

    assert_eq!(*calls.borrow(), 1);
    assert_eq!(expanded.stop, StopReason::Exhausted);
    assert_eq!(expanded.pack.text, "xx");
}

#[test]
fn invariant_fill_threshold_stops_paging() {
    let calls = RefCell::new(0);
    let retriever = |req: &ContextRetrieverRequest| -> Result<ContextPack, RetrievalError> {
        *calls.borrow_mut() += 1;
        Ok(full_page(req))
    };

    // each page is "xx xx xx" (8 chars); half of a 10-char target is 5
    let plan = ExpansionPlan {
        max_pages: 5,
        min_fill_ratio: 0.5,
        target_chars: Some(10),
    };
    let expanded = expand(&retriever, request(3), &plan).unwrap();
    assert_eq!(*calls.borrow(), 1);
    assert_eq!(expanded.stop, StopReason::Filled);

    // a full fill needs a second page: 8 chars is short of 10
    *calls.borrow_mut() = 0;
    let plan = ExpansionPlan {
        min_fill_ratio: 1.0,
        ..plan
    };
    let expanded = expand(&retriever, request(3), &plan).unwrap();
    assert_eq!(*calls.borrow(), 2);
    assert_eq!(expanded.stop, StopReason::Filled);
}

#[test]
fn invariant_unknown_target_never_pages() {
    let calls = RefCell::new(0);
    let retriever = |req: &ContextRetrieverRequest| -> Result<ContextPack, RetrievalError> {
        *calls.borrow_mut() += 1;
        Ok(full_page(req))
    };
    let plan = ExpansionPlan {
        max_pages: 4,
        min_fill_ratio: 1.0,
        target_chars: None,
    };
    let expanded = expand(&retriever, request(2), &plan).unwrap();
    assert_eq!(*calls.borrow(), 1);
    assert_eq!(expanded.stop, StopReason::NoTarget);
}

#[test]
fn invariant_retriever_errors_propagate_unmodified() {
    let retriever = |_: &ContextRetrieverRequest| -> Result<ContextPack, RetrievalError> {
        Err("index offline".into())
    };
    let err = expand(&retriever, request(1), &ExpansionPlan::single_page()).unwrap_err();

    assert!(matches!(err, AssemblyError::Retrieval(_)));
    assert!(!err.is_configuration());
    assert_eq!(err.to_string(), "index offline");
}

// ------------------------------------------------------------
// request building
// ------------------------------------------------------------

#[test]
fn golden_request_merges_corpus_and_retriever_config() {
    let decls = handbook_declarations();
    let ctx = TemplateContext::new().with_input("query", "ownership");
    let docs = decls.retriever("docs").unwrap();

    let req = build_request("docs", docs, &decls, &ctx, Some(10), false).unwrap();

    assert_eq!(req.query, "ownership docs");
    assert_eq!(req.limit, 4, "retriever config overrides corpus config");
    assert_eq!(req.offset, 0);
    assert_eq!(req.max_tokens, Some(10));
    assert_eq!(req.maximum_total_characters, Some(40), "min(100, 10 tokens * 4)");

    let expected: Map<String, Value> = serde_json::from_value(json!({
        "split": "train",
        "backend": "bm25",
        "max_characters_per_source": 50,
        "corpus": "handbook",
        "pack": "docs",
    }))
    .unwrap();
    assert_eq!(req.metadata, expected);
}

#[test]
fn invariant_tightened_request_halves_ceiling_and_limit() {
    let decls = handbook_declarations();
    let ctx = TemplateContext::new();
    let docs = decls.retriever("docs").unwrap();

    let req = build_request("docs", docs, &decls, &ctx, Some(10), true).unwrap();
    assert_eq!(req.maximum_total_characters, Some(20));
    assert_eq!(req.limit, 2);

    let req = build_request("docs", docs, &decls, &ctx, None, true).unwrap();
    assert_eq!(req.maximum_total_characters, Some(50), "explicit cap only, halved");
}

#[test]
fn invariant_query_falls_back_to_input_keys() {
    let decls = Declarations::new().with_retriever(RetrieverDeclaration::new("plain"));
    let plain = decls.retriever("plain").unwrap();

    let ctx = TemplateContext::new().with_input("message", "from message");
    let req = build_request("plain", plain, &decls, &ctx, None, false).unwrap();
    assert_eq!(req.query, "from message");
    assert_eq!(req.limit, DEFAULT_LIMIT);
    assert_eq!(req.maximum_total_characters, None);

    let ctx = ctx.with_input("query", "from query");
    let req = build_request("plain", plain, &decls, &ctx, None, true).unwrap();
    assert_eq!(req.query, "from query");
    assert_eq!(req.limit, DEFAULT_LIMIT / 2);
}

#[test]
fn invariant_unknown_corpus_is_rejected() {
    let decls = Declarations::new()
        .with_retriever(RetrieverDeclaration::new("orphan").with("corpus", "missing"));
    let orphan = decls.retriever("orphan").unwrap();

    let err = build_request("orphan", orphan, &decls, &TemplateContext::new(), None, false).unwrap_err();
    assert!(matches!(err, AssemblyError::UnknownCorpus(ref name) if name == "missing"));
}
