use abi_core::{AnalysisSelection, contract_info, decode_hex_code};
use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;

/// Extract ABI facts from raw EVM runtime bytecode.
#[derive(Debug, Parser)]
#[command(name = "abiscan", version)]
struct Args {
    /// Runtime bytecode as a hex string, or @path to a file containing one
    code: String,

    /// Extract function selectors
    #[arg(long)]
    selectors: bool,

    /// Infer argument types per function (implies --selectors)
    #[arg(long)]
    arguments: bool,

    /// Classify state mutability per function (implies --selectors)
    #[arg(long)]
    state_mutability: bool,

    /// List basic blocks
    #[arg(long)]
    basic_blocks: bool,

    /// Build the control-flow graph
    #[arg(long)]
    control_flow_graph: bool,

    /// Disassemble the bytecode
    #[arg(long)]
    disassemble: bool,
}

impl Args {
    fn selection(&self) -> AnalysisSelection {
        let any = self.selectors
            || self.arguments
            || self.state_mutability
            || self.basic_blocks
            || self.control_flow_graph
            || self.disassemble;
        if !any {
            // No flags: report the full function table.
            return AnalysisSelection {
                selectors: true,
                arguments: true,
                state_mutability: true,
                ..Default::default()
            };
        }
        AnalysisSelection {
            selectors: self.selectors,
            arguments: self.arguments,
            state_mutability: self.state_mutability,
            basic_blocks: self.basic_blocks,
            control_flow_graph: self.control_flow_graph,
            disassemble: self.disassemble,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let raw = match args.code.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).wrap_err_with(|| format!("reading {path}"))?
        }
        None => args.code.clone(),
    };
    let code = decode_hex_code(&raw)?;

    let contract = contract_info(&code, &args.selection());
    println!("{}", serde_json::to_string_pretty(&contract)?);
    Ok(())
}
