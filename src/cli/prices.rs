use super::ui::{self, StyleType};
use crate::App;
use crate::core::models::PriceWithChange;
use crate::dashboard::ChartSeries;
use crate::reconcile::{Displayed, Reconciler};
use anyhow::Result;
use comfy_table::{Cell, Table};
use tracing::debug;

/// Most recent chart rows printed.
const CHART_ROWS: usize = 30;

pub async fn current(app: &App) -> Result<()> {
    let reconciler = app.dashboard.current_prices();
    show(reconciler, "current prices", |prices: &Vec<PriceWithChange>| {
        prices_table(prices)
    })
    .await
}

pub async fn chart(app: &App, grades: &[String], days: u32) -> Result<()> {
    if grades.is_empty() {
        anyhow::bail!("No grades selected for the chart");
    }
    let reconciler = app.dashboard.chart_series(grades, days);
    show(reconciler, "price chart", chart_table).await
}

/// Prints the snapshot right away, then the reconciled result once the group
/// has settled.
async fn show<M>(
    mut reconciler: Reconciler<M>,
    label: &str,
    render: impl Fn(&M) -> Table,
) -> Result<()> {
    let initial = reconciler.view();
    let spinner = if initial.refreshing {
        if let Displayed::Ready { value, as_of, .. } = &initial.displayed {
            println!("{}", ui::as_of_line(*as_of, true));
            println!("{}", render(&**value));
        }
        Some(ui::new_spinner(format!("Refreshing {label}...")))
    } else {
        None
    };

    let view = reconciler.settled().await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    for failure in &view.failures {
        eprintln!(
            "{}",
            ui::style_text(&format!("Part of {label} failed to load: {failure}"), StyleType::Error)
        );
    }

    match &view.displayed {
        Displayed::Ready {
            from_snapshot: false,
            value,
            as_of,
        } => {
            println!("{}", ui::as_of_line(*as_of, false));
            println!("{}", render(&**value));
        }
        Displayed::Ready { value, as_of, .. } => {
            debug!("Refresh produced nothing new, keeping snapshot");
            if !initial.refreshing {
                println!("{}", ui::as_of_line(*as_of, true));
                println!("{}", render(&**value));
            }
            println!(
                "{}",
                ui::style_text("Showing cached data; refresh failed.", StyleType::Subtle)
            );
        }
        Displayed::Empty | Displayed::Loading => {
            if let Some(failure) = view.failures.first() {
                return Err(failure.clone().into());
            }
            println!("No {label} available.");
        }
    }
    Ok(())
}

fn prices_table(prices: &[PriceWithChange]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Grade"),
        ui::header_cell("Date"),
        ui::header_cell("Retail"),
        ui::header_cell("Wholesale"),
        ui::header_cell("Unit"),
        ui::header_cell("Change"),
    ]);
    for price in prices {
        table.add_row(vec![
            Cell::new(&price.grade),
            Cell::new(&price.date),
            ui::format_optional_cell(price.retail_price, ui::format_price),
            ui::format_optional_cell(price.wholesale_price, ui::format_price),
            Cell::new(&price.unit),
            ui::change_cell(price.daily_change_pct),
        ]);
    }
    table
}

fn chart_table(chart: &ChartSeries) -> Table {
    let mut table = ui::new_styled_table();
    let mut header = vec![ui::header_cell("Date")];
    header.extend(chart.series.iter().map(|s| ui::header_cell(s)));
    table.set_header(header);

    let skip = chart.points.len().saturating_sub(CHART_ROWS);
    for point in chart.points.iter().skip(skip) {
        let mut row = vec![Cell::new(&point.date)];
        row.extend(
            point
                .values
                .iter()
                .map(|v| ui::format_optional_cell(*v, ui::format_price)),
        );
        table.add_row(row);
    }
    table
}
