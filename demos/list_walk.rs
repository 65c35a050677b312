use std::collections::BTreeSet;

use clap::Parser;

use smg_rs::context::AnalysisContext;
use smg_rs::expr::Expr;
use smg_rs::frame::FunctionDecl;
use smg_rs::machine::CType;
use smg_rs::options::SmgOptions;
use smg_rs::state::SmgState;
use smg_rs::transfer::CfaEdge;

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Number of list nodes to allocate.
    #[arg(value_name = "INT", default_value = "5")]
    n: usize,

    /// Number of `p = p->next` steps to take after abstraction.
    #[clap(long, value_name = "INT", default_value = "2")]
    steps: usize,

    /// Print the final states in DOT format.
    #[clap(long)]
    dot: bool,

    /// Free the list before leaving `main`.
    #[clap(long)]
    free: bool,
}

/// Runs `edge` on every state.
fn step(states: Vec<SmgState>, edge: &CfaEdge) -> color_eyre::Result<Vec<SmgState>> {
    let mut successors = Vec::new();
    for state in states {
        successors.extend(state.successors(edge)?);
    }
    Ok(successors)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Cli::parse();
    println!("args = {:?}", args);

    // struct node { long data; struct node *next; }
    let node_bytes = 16;
    let next_offset = 64;
    let head = Expr::var("head", CType::Pointer);
    let tmp = Expr::var("tmp", CType::Pointer);
    let p = Expr::var("p", CType::Pointer);
    let declare = |name: &str| CfaEdge::Declaration {
        name: name.into(),
        ty: CType::Pointer,
        global: false,
        initializer: Some(Expr::null()),
    };

    let ctx = AnalysisContext::with_options(SmgOptions::default());
    let main = SmgState::initial(ctx).add_stack_frame(FunctionDecl::new("main", Some(32)))?;
    let mut states = vec![main];
    for name in ["head", "tmp", "p"] {
        states = step(states, &declare(name))?;
    }

    // Build the list by pushing to the front.
    for i in 0..args.n {
        let edges = [
            CfaEdge::Call {
                result: Some(tmp.clone()),
                function: "malloc".into(),
                arguments: vec![Expr::int(node_bytes, CType::Long)],
            },
            CfaEdge::Assignment {
                lhs: tmp.clone().arrow(0, CType::Long),
                rhs: Expr::int(i as i64, CType::Long),
            },
            CfaEdge::Assignment {
                lhs: tmp.clone().arrow(next_offset, CType::Pointer),
                rhs: head.clone(),
            },
            CfaEdge::Assignment {
                lhs: head.clone(),
                rhs: tmp.clone(),
            },
        ];
        for edge in &edges {
            states = step(states, edge)?;
        }
    }
    states = step(
        states,
        &CfaEdge::Assignment {
            lhs: tmp.clone(),
            rhs: Expr::null(),
        },
    )?;
    println!("built a list of {} nodes in {} state(s)", args.n, states.len());

    // Summarize the list.
    let mut abstracted = Vec::new();
    for state in states {
        let (state, changed) = state.execute_heap_abstraction(&BTreeSet::new())?;
        println!("abstraction changed the state: {}", changed);
        abstracted.push(state);
    }
    let mut states = abstracted;
    for state in &states {
        let segments = state.smg().objects().filter(|o| o.is_list_segment()).count();
        println!("state {}: {} object(s), {} segment(s)", state.id(), state.smg().object_count(), segments);
    }

    // Walk the list; each dereference of the segment materializes a node.
    states = step(
        states,
        &CfaEdge::Assignment {
            lhs: p.clone(),
            rhs: head.clone(),
        },
    )?;
    for _ in 0..args.steps {
        let not_null = CfaEdge::Assume {
            condition: p.clone().not_equals(Expr::null()),
            truth: true,
        };
        let advance = CfaEdge::Assignment {
            lhs: p.clone(),
            rhs: p.clone().arrow(next_offset, CType::Pointer),
        };
        states = step(states, &not_null)?;
        states = step(states, &advance)?;
        println!("after one step: {} state(s)", states.len());
    }

    if args.free {
        // while (head) { tmp = head->next; free(head); head = tmp; }, unrolled n times
        for _ in 0..args.n {
            let edges = [
                CfaEdge::Assume {
                    condition: head.clone().not_equals(Expr::null()),
                    truth: true,
                },
                CfaEdge::Assignment {
                    lhs: tmp.clone(),
                    rhs: head.clone().arrow(next_offset, CType::Pointer),
                },
                CfaEdge::Call {
                    result: None,
                    function: "free".into(),
                    arguments: vec![head.clone()],
                },
                CfaEdge::Assignment {
                    lhs: head.clone(),
                    rhs: tmp.clone(),
                },
            ];
            for edge in &edges {
                states = step(states, edge)?;
            }
        }
    }

    states = step(states, &CfaEdge::FunctionExit { result: None })?;
    for state in &states {
        println!(
            "final state {}: errors={}, leaks={}",
            state.id(),
            state.has_memory_errors(),
            state.has_memory_leaks()
        );
        if let Some(description) = state.error_description() {
            println!("  {}", description);
        }
        if args.dot {
            println!("{}", state.to_dot()?);
        }
    }

    Ok(())
}
