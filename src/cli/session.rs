use super::ui::{self, StyleType};
use crate::App;
use crate::client::SessionExpiredHook;
use anyhow::Result;
use comfy_table::Cell;

/// Tells the user to sign in again once the session could not be recovered.
pub struct ExpiredNotice;

impl SessionExpiredHook for ExpiredNotice {
    fn on_session_expired(&self) {
        eprintln!(
            "{}",
            ui::style_text(
                "Your session has expired. Run `pricecast login` to sign in again.",
                StyleType::Error
            )
        );
    }
}

pub async fn login(app: &App, email: &str, password: &str) -> Result<()> {
    let identity = app.session.sign_in(&app.api, email, password).await?;
    app.dashboard.reset();
    println!(
        "Logged in as {} <{}>",
        ui::style_text(&identity.name, StyleType::Value),
        identity.email
    );
    Ok(())
}

pub async fn register(app: &App, email: &str, password: &str, name: &str) -> Result<()> {
    let identity = app.session.sign_up(&app.api, email, password, name).await?;
    app.dashboard.reset();
    println!(
        "Account created. Logged in as {} <{}>",
        ui::style_text(&identity.name, StyleType::Value),
        identity.email
    );
    Ok(())
}

/// Finishes a social login from the redirect URL or its fragment.
pub async fn oauth_callback(app: &App, url: &str) -> Result<()> {
    let identity = app.session.complete_oauth_callback(&app.api, url).await?;
    app.dashboard.reset();
    println!(
        "Logged in as {} <{}>",
        ui::style_text(&identity.name, StyleType::Value),
        identity.email
    );
    Ok(())
}

pub fn logout(app: &App) -> Result<()> {
    app.logout();
    println!("Logged out.");
    Ok(())
}

pub async fn whoami(app: &App) -> Result<()> {
    if app.session.credentials().get().is_none() {
        println!("{}", ui::style_text("Not logged in.", StyleType::Subtle));
        return Ok(());
    }

    let user = app.dashboard.load(&app.dashboard.me_query()).await?;
    let identity = app.session.remember_profile((*user).clone())?;
    let mut table = ui::new_styled_table();
    table.add_row(vec![ui::header_cell("Name"), Cell::new(&identity.name)]);
    table.add_row(vec![ui::header_cell("Email"), Cell::new(&identity.email)]);
    table.add_row(vec![ui::header_cell("ID"), Cell::new(identity.id)]);
    println!("{table}");
    Ok(())
}
