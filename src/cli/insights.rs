use super::ui::{self, StyleType};
use crate::App;
use anyhow::Result;
use comfy_table::{Cell, Color};

pub async fn forecast(app: &App, grade: &str) -> Result<()> {
    let forecast = app
        .dashboard
        .load(&app.dashboard.forecast_query(grade))
        .await?;

    println!(
        "\nForecast: {} ({})",
        ui::style_text(&forecast.grade, StyleType::Title),
        forecast.trend
    );
    if let Some(price) = forecast.current_price {
        println!(
            "{} {}",
            ui::style_text("Current price:", StyleType::Label),
            ui::format_price(price)
        );
    }
    if let Some(alert) = &forecast.alert {
        println!("{}", ui::style_text(alert, StyleType::Error));
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Price"),
        ui::header_cell("Range"),
        ui::header_cell("Change"),
    ]);
    for item in &forecast.predictions {
        let (low, high) = item.confidence_interval;
        table.add_row(vec![
            Cell::new(&item.date),
            ui::format_optional_cell(Some(item.price), ui::format_price),
            Cell::new(format!(
                "{} - {}",
                ui::format_price(low),
                ui::format_price(high)
            )),
            ui::change_cell(Some(item.change_percent)),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn predictions(app: &App, grade: &str, refresh: bool) -> Result<()> {
    if refresh {
        let spinner = ui::new_spinner("Regenerating predictions...");
        let result = app.dashboard.refresh_predictions().await;
        spinner.finish_and_clear();
        let generated = result?;
        println!("Regenerated {} predictions.", generated.len());
    }

    let summary = app
        .dashboard
        .load(&app.dashboard.predictions_query(grade))
        .await?;

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Target"),
        ui::header_cell("Horizon"),
        ui::header_cell("Price"),
        ui::header_cell("Lower"),
        ui::header_cell("Upper"),
        ui::header_cell("Model"),
    ]);
    for prediction in &summary.predictions {
        table.add_row(vec![
            Cell::new(&prediction.target_date),
            Cell::new(format!("{}d", prediction.horizon_days)),
            ui::format_optional_cell(Some(prediction.predicted_price), ui::format_price),
            ui::format_optional_cell(Some(prediction.confidence_lower), ui::format_price),
            ui::format_optional_cell(Some(prediction.confidence_upper), ui::format_price),
            Cell::new(&prediction.model_version),
        ]);
    }
    println!(
        "\nPredictions: {}",
        ui::style_text(&summary.grade, StyleType::Title)
    );
    println!("{table}");
    Ok(())
}

pub async fn market(app: &App, date: Option<&str>) -> Result<()> {
    let snapshot = app
        .dashboard
        .load(&app.dashboard.market_snapshot_query(date))
        .await?;

    println!(
        "\nMarket snapshot: {}",
        ui::style_text(&snapshot.date, StyleType::Title)
    );
    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Grade"), ui::header_cell("Price")]);
    for (grade, price) in &snapshot.prices {
        table.add_row(vec![
            Cell::new(grade),
            ui::format_optional_cell(*price, ui::format_price),
        ]);
    }
    println!("{table}");

    let mut factors = ui::new_styled_table();
    factors.set_header(vec![ui::header_cell("Factor"), ui::header_cell("Value")]);
    factors.add_row(vec![
        Cell::new("Volume"),
        ui::format_optional_cell(snapshot.volume, |v| format!("{v:.0}")),
    ]);
    factors.add_row(vec![
        Cell::new("Corn price"),
        ui::format_optional_cell(snapshot.corn_price, |v| format!("{v:.2}")),
    ]);
    factors.add_row(vec![
        Cell::new("KRW/USD"),
        ui::format_optional_cell(snapshot.exchange_rate, |v| format!("{v:.2}")),
    ]);
    factors.add_row(vec![
        Cell::new("Temperature"),
        ui::format_optional_cell(snapshot.temperature, |v| format!("{v:.1}°C")),
    ]);
    let flu = if snapshot.avian_flu {
        Cell::new("reported").fg(Color::Red)
    } else {
        Cell::new("none").fg(Color::Green)
    };
    factors.add_row(vec![Cell::new("Avian flu"), flu]);
    println!("{factors}");
    Ok(())
}

pub async fn factors(app: &App, grade: &str) -> Result<()> {
    let analytics = app
        .dashboard
        .load(&app.dashboard.analytics_factors_query(grade))
        .await?;

    println!(
        "\nPrice factors: {} ({})",
        ui::style_text(&analytics.grade, StyleType::Title),
        analytics.date
    );
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Factor"),
        ui::header_cell("Direction"),
        ui::header_cell("Value"),
        ui::header_cell("Description"),
    ]);
    for factor in &analytics.factors {
        table.add_row(vec![
            Cell::new(&factor.factor),
            Cell::new(&factor.direction),
            ui::format_optional_cell(factor.value, |v| format!("{v:.2}")),
            Cell::new(&factor.description),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn model(app: &App, grade: &str) -> Result<()> {
    let current = app
        .dashboard
        .load(&app.dashboard.current_model_query(grade))
        .await?;
    let history = app
        .dashboard
        .load(&app.dashboard.model_performance_query(grade))
        .await?;

    match current.as_ref() {
        Some(model) => println!(
            "\nProduction model for {}: {}",
            ui::style_text(grade, StyleType::Title),
            ui::style_text(&model.model_version, StyleType::Value)
        ),
        None => println!(
            "\n{}",
            ui::style_text(&format!("No production model for {grade}"), StyleType::Subtle)
        ),
    }

    if history.is_empty() {
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Version"),
        ui::header_cell("Evaluated"),
        ui::header_cell("MAE"),
        ui::header_cell("RMSE"),
        ui::header_cell("MAPE"),
        ui::header_cell("Direction"),
    ]);
    for model in history.iter() {
        let version = if model.is_production {
            Cell::new(format!("{} *", model.model_version)).fg(Color::Green)
        } else {
            Cell::new(&model.model_version)
        };
        table.add_row(vec![
            version,
            Cell::new(&model.eval_date),
            Cell::new(format!("{:.1}", model.mae)),
            Cell::new(format!("{:.1}", model.rmse)),
            Cell::new(format!("{:.2}%", model.mape)),
            Cell::new(format!("{:.1}%", model.directional_accuracy)),
        ]);
    }
    println!("{table}");
    Ok(())
}
