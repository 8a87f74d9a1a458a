//! Weather tools served over MCP.
//!
//! Two tools, `get_daily_forecast` and `get_weather_warning`, backed by a
//! pluggable [`WeatherSource`].

mod source;

pub use source::{
    DailyForecast, FixedSource, Forecast, Location, OpenMeteo, OpenMeteoBuilder, SourceError, Warning,
    WarningKind, WeatherSource, derive_warnings, describe_weather_code,
};

use std::sync::Arc;

use mcp::{
    Arguments, HandlerError, Host, Implementation, ParamSpec, ParamType, ToolContent,
    ToolDescriptor, ToolRegistry,
};
use serde_json::Value;
use tracing::info;

pub const FORECAST_TOOL: &str = "get_daily_forecast";
pub const WARNING_TOOL: &str = "get_weather_warning";

pub const DEFAULT_FORECAST_DAYS: i64 = 3;
/// Longest forecast any source is asked for.
pub const MAX_FORECAST_DAYS: i64 = 16;

pub fn forecast_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        FORECAST_TOOL,
        "Get the daily weather forecast for a location.",
    )
    .param(
        "location",
        ParamSpec::required(ParamType::String)
            .or(ParamType::Integer)
            .with_description("City name, or a numeric geocoding id"),
    )
    .param(
        "days",
        ParamSpec::optional(ParamType::Integer)
            .with_default(DEFAULT_FORECAST_DAYS)
            .with_description("Number of days, 1 to 16"),
    )
}

pub fn warning_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        WARNING_TOOL,
        "Get active weather warnings for a location.",
    )
    .param(
        "location",
        ParamSpec::required(ParamType::String).with_description("City name"),
    )
}

/// Registry with both weather tools, in the order clients discover them.
pub fn registry<S: WeatherSource>(source: S) -> mcp::Result<ToolRegistry> {
    let source = Arc::new(source);
    let mut registry = ToolRegistry::new();

    let forecast_source = Arc::clone(&source);
    registry.register(forecast_descriptor(), move |args: Arguments| {
        let source = Arc::clone(&forecast_source);
        async move { daily_forecast(source.as_ref(), args).await }
    })?;

    registry.register(warning_descriptor(), move |args: Arguments| {
        let source = Arc::clone(&source);
        async move { weather_warning(source.as_ref(), args).await }
    })?;

    Ok(registry)
}

/// A host serving the weather tools.
pub fn host<S: WeatherSource>(source: S) -> mcp::Result<Host> {
    let info = Implementation::new("weather", env!("CARGO_PKG_VERSION"));
    Ok(Host::new(Arc::new(registry(source)?), info)
        .with_instructions("Ask for a forecast or for warnings by city name."))
}

async fn daily_forecast<S: WeatherSource>(
    source: &S,
    args: Arguments,
) -> Result<Vec<ToolContent>, HandlerError> {
    let location = location_arg(&args)?;
    let days = args
        .get("days")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_FORECAST_DAYS)
        .clamp(1, MAX_FORECAST_DAYS) as u32;

    info!(tool = FORECAST_TOOL, %location, days, "fetching forecast");
    let forecast = source
        .daily_forecast(&location, days)
        .await
        .map_err(|e| HandlerError::new(e.to_string()))?;
    Ok(vec![ToolContent::text(render_forecast(&forecast))])
}

async fn weather_warning<S: WeatherSource>(
    source: &S,
    args: Arguments,
) -> Result<Vec<ToolContent>, HandlerError> {
    let location = location_arg(&args)?;

    info!(tool = WARNING_TOOL, %location, "checking warnings");
    let warnings = source
        .warnings(&location)
        .await
        .map_err(|e| HandlerError::new(e.to_string()))?;
    Ok(vec![ToolContent::text(render_warnings(&location, &warnings))])
}

fn location_arg(args: &Arguments) -> Result<Location, HandlerError> {
    match args.get("location") {
        Some(Value::String(name)) => Ok(Location::Name(name.clone())),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Location::Id)
            .ok_or_else(|| HandlerError::new(format!("location id out of range: {n}"))),
        _ => Err(HandlerError::new("missing location")),
    }
}

pub fn render_forecast(forecast: &Forecast) -> String {
    let count = forecast.days.len();
    let mut text = format!(
        "Daily forecast for {} ({count} {}):",
        forecast.location,
        if count == 1 { "day" } else { "days" }
    );
    for day in &forecast.days {
        text.push('\n');
        text.push_str(&day.to_string());
    }
    text
}

pub fn render_warnings(location: &Location, warnings: &[Warning]) -> String {
    if warnings.is_empty() {
        return format!("No active weather warnings for {location}.");
    }
    let mut text = format!("Weather warnings for {location}:");
    for warning in warnings {
        text.push_str("\n- ");
        text.push_str(&warning.to_string());
    }
    text
}
