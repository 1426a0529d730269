//! Helpers shared by the integration tests.

#![allow(dead_code)]

use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic};
use kelp::kir::{parse_graph, print_graph};
use kelp::opt::{Canonicalizer, CanonicalizerStats};
use kelp::{CompileResult, Graph};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn parse(text: &str) -> Graph {
    parse_graph(text).unwrap_or_else(|e| panic!("failed to parse test graph: {e}\n{text}"))
}

/// Canonicalize with the default configuration and check the result.
pub fn canon(text: &str) -> (Graph, CanonicalizerStats) {
    let mut graph = parse(text);
    let stats = Canonicalizer::new(Default::default())
        .canonicalize(&mut graph)
        .unwrap();
    graph.verify().unwrap();
    (graph, stats)
}

pub fn canon_text(text: &str) -> String {
    print_graph(&canon(text).0)
}

pub fn try_canon(text: &str) -> CompileResult<Graph> {
    let mut graph = parse(text);
    Canonicalizer::new(Default::default()).canonicalize(&mut graph)?;
    Ok(graph)
}

pub fn decode(code: &[u8]) -> Vec<Instruction> {
    let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    while decoder.can_decode() {
        instructions.push(decoder.decode());
    }
    instructions
}

pub fn mnemonics(code: &[u8]) -> Vec<Mnemonic> {
    decode(code).iter().map(|i| i.mnemonic()).collect()
}
