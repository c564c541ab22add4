//! `areawatch search`: one-shot queries rendered from the area store.

use std::collections::BTreeSet;
use std::sync::Arc;

use areawatch_api::WebSocketConnector;
use areawatch_core::{AreaFilter, AreaSnapshot, CountryId, Session, SessionError};
use tokio::task::JoinSet;
use tracing::debug;

use crate::cli::{GlobalOpts, SearchArgs};
use crate::config::Target;
use crate::error::CliError;
use crate::output;

/// Terms that came back empty, plus the store after every search landed.
struct SearchOutcome {
    matched: BTreeSet<CountryId>,
    unmatched: Vec<String>,
    snapshot: Arc<AreaSnapshot>,
}

pub async fn handle(args: SearchArgs, target: Target, global: &GlobalOpts) -> Result<(), CliError> {
    let endpoint = target.endpoint();
    let Target {
        profile_name,
        session: config,
        credential,
    } = target;

    let spinner = super::spinner(global, &format!("Searching {} term(s) on {endpoint}", args.terms.len()));
    let connector = WebSocketConnector::new(config.url.clone())
        .with_handshake_timeout(config.connect_timeout);

    let terms = args.terms;
    let result = Session::oneshot(config, connector, credential, |session| run_searches(session, terms)).await;
    spinner.finish_and_clear();

    let outcome = result.map_err(|e| CliError::from_session(e, &endpoint, &profile_name))?;

    if !global.quiet {
        for term in &outcome.unmatched {
            eprintln!("no countries matched '{term}'");
        }
    }

    let filter = if args.all {
        AreaFilter::All
    } else {
        AreaFilter::Countries(outcome.matched.into_iter().collect())
    };
    let records: Vec<_> = outcome.snapshot.filtered(&filter).collect();
    output::print_output(&output::render_records(global.output, &records), global.quiet);
    Ok(())
}

/// Issue every search concurrently; the first failure aborts the rest.
async fn run_searches(session: Session, terms: Vec<String>) -> Result<SearchOutcome, SessionError> {
    let mut tasks = JoinSet::new();
    for term in terms {
        let session = session.clone();
        tasks.spawn(async move {
            let result = session.search(&term).await;
            (term, result)
        });
    }

    let mut matched = BTreeSet::new();
    let mut unmatched = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (term, result) = joined.map_err(|e| SessionError::Protocol {
            message: format!("search task failed: {e}"),
        })?;
        let records = result?;
        debug!(%term, count = records.len(), "search answered");
        if records.is_empty() {
            unmatched.push(term);
        }
        matched.extend(records.into_iter().map(|r| r.country_id));
    }
    unmatched.sort();

    Ok(SearchOutcome {
        matched,
        unmatched,
        snapshot: session.snapshot(),
    })
}
