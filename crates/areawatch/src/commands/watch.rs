//! `areawatch watch`: live table driven by store changes.

use std::io::{IsTerminal, Write};

use areawatch_core::{
    AreaFilter, AreaRecord, AuthCredential, AuthState, ConnectionState, CountryId, Session,
    SessionError,
};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config::Target;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: WatchArgs, target: Target, global: &GlobalOpts) -> Result<(), CliError> {
    let endpoint = target.endpoint();
    let Target {
        profile_name,
        session: config,
        credential,
    } = target;
    let give_up_after = config.reconnect.max_retries.map_or(0, |n| n.saturating_add(1));
    let context = |e: SessionError| CliError::from_session(e, &endpoint, &profile_name);

    let session = Session::with_websocket(config);

    let spinner = super::spinner(global, &format!("Connecting to {endpoint}"));
    let opened = async {
        session.connect().await?;
        spinner.set_message("Authenticating");
        session.authenticate(credential.clone()).await
    }
    .await;
    spinner.finish_and_clear();
    opened.map_err(context)?;

    for term in &args.searches {
        if let Err(e) = session.search(term).await {
            warn!(%term, error = %e, "seed search failed");
        }
    }

    let filter = build_filter(&args);
    let color = output::should_color(global.color);
    let mut areas = session.store().subscribe();
    let mut connection = session.connection_state();
    let mut activity = session.query_activity();

    render(&session, &filter, global, color);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // At most one re-authentication handshake, polled from the select loop.
    let mut reauth: JoinSet<Result<(), SessionError>> = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                match state {
                    ConnectionState::Failed => {
                        render(&session, &filter, global, color);
                        return Err(CliError::ConnectionFailed {
                            endpoint: endpoint.clone(),
                            attempts: give_up_after,
                        });
                    }
                    ConnectionState::Reauthenticating => {
                        info!("transport recovered, re-authenticating");
                        start_reauth(&mut reauth, &session, &credential);
                    }
                    _ => {}
                }
            }
            Some(joined) = reauth.join_next() => {
                let outcome = joined.unwrap_or_else(|e| {
                    warn!(error = %e, "re-authentication task ended abnormally");
                    Err(SessionError::NotConnected)
                });
                match outcome {
                    Ok(()) => info!("re-authenticated"),
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "re-authentication interrupted, will retry");
                        if *connection.borrow() == ConnectionState::Reauthenticating {
                            start_reauth(&mut reauth, &session, &credential);
                        }
                    }
                    Err(e) => return Err(context(e)),
                }
            }
            changed = areas.changed() => {
                if changed.is_none() {
                    break;
                }
            }
            changed = activity.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        render(&session, &filter, global, color);
    }

    if let Err(e) = session.close().await {
        warn!(error = %e, "close failed");
    }
    Ok(())
}

/// Spawn a handshake for the recovered transport unless one is running or
/// the session is already past it.
fn start_reauth(
    reauth: &mut JoinSet<Result<(), SessionError>>,
    session: &Session,
    credential: &AuthCredential,
) {
    if !reauth.is_empty() || *session.auth_state().borrow() != AuthState::Unauthenticated {
        return;
    }
    let session = session.clone();
    let credential = credential.clone();
    reauth.spawn(async move { session.authenticate(credential).await });
}

/// Failures the reconnect machinery recovers from on its own: the transport
/// dropped mid-handshake, or the server never answered.
fn is_transient(err: &SessionError) -> bool {
    matches!(err, SessionError::NotConnected | SessionError::AuthTimeout { .. })
}

fn build_filter(args: &WatchArgs) -> AreaFilter {
    let ids: Vec<CountryId> = args
        .countries
        .iter()
        .map(|c| CountryId::from(c.trim()))
        .collect();
    match (ids.is_empty(), args.min_area) {
        (true, None) => AreaFilter::All,
        (false, None) => AreaFilter::Countries(ids),
        (true, Some(min)) => AreaFilter::MinArea(min),
        (false, Some(min)) => AreaFilter::Custom(Box::new(move |r: &AreaRecord| {
            ids.contains(&r.country_id) && r.area >= min
        })),
    }
}

fn render(session: &Session, filter: &AreaFilter, global: &GlobalOpts, color: bool) {
    let snapshot = session.snapshot();
    let records: Vec<_> = snapshot.filtered(filter).collect();
    let body = output::render_records(global.output, &records);

    if global.output != OutputFormat::Table {
        // One document per change, suitable for piping.
        output::print_output(&body, global.quiet);
        return;
    }

    let status = output::status_line(&session.status(), color);
    let mut frame = String::new();
    if std::io::stdout().is_terminal() {
        frame.push_str("\x1b[2J\x1b[H");
    }
    frame.push_str(&format!(
        "{status}  ·  {} countries  ·  generation {}\n{body}",
        snapshot.len(),
        snapshot.generation
    ));
    output::print_output(&frame, global.quiet);
    let _ = std::io::stdout().flush();
}
