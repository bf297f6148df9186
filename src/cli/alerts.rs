use super::ui::{self, StyleType};
use crate::App;
use crate::core::models::{AlertCondition, AlertCreate};
use anyhow::{Context, Result};
use comfy_table::{Cell, Color};

/// Alerts belong to an email address; default to the signed-in user's.
fn resolve_email(app: &App, email: Option<&str>) -> Result<String> {
    pick_email(email, app.session.identity().map(|identity| identity.email))
}

/// An explicit email wins over the session's. Blank addresses are rejected
/// rather than queried.
fn pick_email(explicit: Option<&str>, from_session: Option<String>) -> Result<String> {
    match explicit {
        Some(email) if email.trim().is_empty() => anyhow::bail!("Email must not be empty"),
        Some(email) => Ok(email.trim().to_string()),
        None => from_session
            .filter(|email| !email.trim().is_empty())
            .context("Not logged in; pass --email or run `pricecast login`"),
    }
}

pub async fn list(app: &App, email: Option<&str>) -> Result<()> {
    let email = resolve_email(app, email)?;
    let alerts = app
        .dashboard
        .load(&app.dashboard.alerts_query(&email))
        .await?;

    if alerts.is_empty() {
        println!("No alerts for {email}.");
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("ID"),
        ui::header_cell("Grade"),
        ui::header_cell("Condition"),
        ui::header_cell("Threshold"),
        ui::header_cell("Notify"),
        ui::header_cell("Active"),
    ]);
    for alert in alerts.iter() {
        let channels: Vec<&str> = [(alert.notify_email, "email"), (alert.notify_sms, "sms")]
            .into_iter()
            .filter_map(|(on, name)| on.then_some(name))
            .collect();
        let active = if alert.is_active {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(alert.id),
            Cell::new(&alert.grade),
            Cell::new(alert.condition),
            ui::format_optional_cell(Some(alert.threshold_price), ui::format_price),
            Cell::new(channels.join(", ")),
            active,
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn create(
    app: &App,
    grade: &str,
    condition: AlertCondition,
    threshold: f64,
    email: Option<&str>,
) -> Result<()> {
    let email = resolve_email(app, email)?;
    let alert = app
        .dashboard
        .create_alert(&AlertCreate {
            email,
            phone: None,
            grade: grade.to_string(),
            condition,
            threshold_price: threshold,
            notify_email: true,
            notify_sms: false,
        })
        .await
        .context("Failed to create alert")?;

    println!(
        "Created alert {}: {} {} {}",
        ui::style_text(&alert.id.to_string(), StyleType::Value),
        alert.grade,
        alert.condition,
        ui::format_price(alert.threshold_price)
    );
    Ok(())
}

pub async fn delete(app: &App, id: i64) -> Result<()> {
    app.dashboard
        .delete_alert(id)
        .await
        .with_context(|| format!("Failed to delete alert {id}"))?;
    println!("Deleted alert {id}.");
    Ok(())
}
