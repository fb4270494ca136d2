use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clearance_rs::{
    ChallengeSolver,
    DelegatedSolver,
    ServiceSupervisor,
    SolverOptions,
    SupervisorConfig,
    VERSION,
};
use tokio::runtime::Runtime;
use url::Url;

fn prompt(label: &str) -> io::Result<String> {
    print!("{} ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn parse_bool(input: &str, default: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => true,
        "n" | "no" | "false" => false,
        _ => default,
    }
}

fn parse_secs(input: &str, default: u64) -> u64 {
    input.trim().parse().ok().filter(|value| *value > 0).unwrap_or(default)
}

#[test]
#[ignore = "Requires a running solver service, network access, and manual input"]
fn interactive_delegated_solve() -> Result<(), Box<dyn Error>> {
    println!("clearance-rs {} interactive smoke test", VERSION);
    println!("Provide inputs when prompted. Press Enter to accept defaults.\n");

    let url_input = prompt("Target URL [https://example.com]:")?;
    let target = if url_input.is_empty() {
        Url::parse("https://example.com")?
    } else {
        Url::parse(&url_input)?
    };

    let supervise_answer = prompt("Start the solver service via the supervisor? (y/N):")?;
    let solver_dir_answer = prompt("Solver service directory [FlareSolverr]:")?;
    let timeout_answer = prompt("Solve timeout in seconds [60]:")?;
    let user_agent_answer = prompt("User-agent override (blank for none):")?;

    let timeout = Duration::from_secs(parse_secs(&timeout_answer, 60));

    let mut options = SolverOptions::default().with_timeout(timeout);
    if !user_agent_answer.is_empty() {
        options = options.with_user_agent(user_agent_answer);
    }

    let runtime = Runtime::new()?;

    let supervisor = if parse_bool(&supervise_answer, false) {
        let mut config = SupervisorConfig::default();
        if !solver_dir_answer.is_empty() {
            config = config.with_solver_dir(solver_dir_answer);
        }
        let supervisor = Arc::new(ServiceSupervisor::new(config));
        if !runtime.block_on(supervisor.start()) {
            println!("Supervisor could not start the service; assuming it is already running.");
        }
        Some(supervisor)
    } else {
        None
    };

    let solver = DelegatedSolver::new(options);

    println!("\nSolving {}...", target);
    let response = runtime.block_on(solver.get_response(&target))?;

    println!("Success: {}", response.success());
    if let Some(status) = response.status() {
        println!("Page status: {}", status);
    }
    if let Some(user_agent) = response.user_agent() {
        println!("User-agent: {}", user_agent);
    }
    println!("Cookies harvested: {}", response.cookies().len());
    for cookie in response.cookies() {
        println!("  {}", cookie.pair());
    }

    if let Some(body) = response.body_bytes() {
        let bytes = body?;
        let preview: String = String::from_utf8_lossy(bytes).chars().take(400).collect();
        println!("Body preview (first 400 chars):\n{}\n", preview);
    }

    if let Some(supervisor) = supervisor {
        runtime.block_on(supervisor.stop());
    }

    println!("Interactive test complete. Re-run with different inputs as needed.");
    Ok(())
}
