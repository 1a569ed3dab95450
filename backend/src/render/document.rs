//! Self-contained HTML document for image and PDF exports.
//!
//! Charts are drawn by Chart.js inside the page. Every chart resolves once,
//! on its first animation completion; when all have resolved the page sets
//! `window.chartsRendered = true`. A page-level failure (library not loaded,
//! chart constructor threw) sets `window.chartsRenderError` instead.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::error::RenderResult;
use crate::layout::GRID_COLUMNS;
use crate::models::{ChartType, ExportLayoutItem, Row, VisualizationSnapshot};

/// Chart.js bundle loaded by the document.
pub const CHART_JS_URL: &str = "https://cdn.jsdelivr.net/npm/chart.js@4/dist/chart.umd.min.js";

/// Height of one grid row in pixels.
const ROW_HEIGHT_PX: u32 = 60;

const PALETTE: [&str; 8] = [
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
];

/// Escape text for HTML element and attribute content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Serialize JSON for embedding inside a `<script>` element.
fn script_json(value: &Value) -> RenderResult<String> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

fn label(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::String(String::new()),
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(other) => Value::String(other.to_string()),
    }
}

/// Numeric value of a cell; numeric strings are parsed.
fn number(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Number(n)) => Value::Number(n.clone()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Value::Bool(b)) => json!(u8::from(*b)),
        _ => Value::Null,
    }
}

/// Chart.js configuration for one snapshot.
pub fn chart_config(snapshot: &VisualizationSnapshot) -> Value {
    let rows: &[Row] = &snapshot.data;
    let x = snapshot.x_field.as_str();
    let y = snapshot.y_field.as_str();

    let (kind, data) = match snapshot.chart_type {
        ChartType::Scatter => {
            let points: Vec<Value> = rows
                .iter()
                .map(|row| {
                    let px = match number(row.get(x)) {
                        Value::Null => label(row.get(x)),
                        n => n,
                    };
                    json!({ "x": px, "y": number(row.get(y)) })
                })
                .collect();
            (
                "scatter",
                json!({ "datasets": [{ "label": y, "data": points, "backgroundColor": PALETTE[0] }] }),
            )
        }
        chart_type => {
            let labels: Vec<Value> = rows.iter().map(|row| label(row.get(x))).collect();
            let values: Vec<Value> = rows.iter().map(|row| number(row.get(y))).collect();
            let mut dataset = json!({ "label": y, "data": values });
            match chart_type {
                ChartType::Pie => {
                    let colors: Vec<&str> = (0..rows.len()).map(|i| PALETTE[i % PALETTE.len()]).collect();
                    dataset["backgroundColor"] = json!(colors);
                }
                ChartType::Area => {
                    dataset["fill"] = json!(true);
                    dataset["borderColor"] = json!(PALETTE[0]);
                    dataset["backgroundColor"] = json!("rgba(78, 121, 167, 0.3)");
                }
                _ => {
                    dataset["borderColor"] = json!(PALETTE[0]);
                    dataset["backgroundColor"] = json!(PALETTE[0]);
                }
            }
            let kind = match chart_type {
                ChartType::Area => "line",
                other => other.as_str(),
            };
            (kind, json!({ "labels": labels, "datasets": [dataset] }))
        }
    };

    let mut options = Map::new();
    options.insert("responsive".into(), json!(true));
    options.insert("maintainAspectRatio".into(), json!(false));
    if let Some(Value::Object(custom)) = snapshot.config.get("options") {
        for (k, v) in custom {
            options.insert(k.clone(), v.clone());
        }
    }

    json!({ "type": kind, "data": data, "options": Value::Object(options) })
}

fn grid_style(item: Option<&ExportLayoutItem>) -> String {
    match item {
        Some(item) => format!(
            "grid-column: {} / span {}; grid-row: {} / span {};",
            item.x + 1,
            item.w,
            item.y + 1,
            item.h
        ),
        None => format!("grid-column: 1 / span {};", GRID_COLUMNS),
    }
}

/// Compose the full export page.
pub fn compose_document(
    title: &str,
    description: &str,
    snapshots: &[VisualizationSnapshot],
    layout: &[ExportLayoutItem],
) -> RenderResult<String> {
    let items: HashMap<&str, &ExportLayoutItem> =
        layout.iter().map(|i| (i.visualization_id.as_str(), i)).collect();

    let mut sections = String::new();
    let mut configs = Vec::with_capacity(snapshots.len());
    for (index, snapshot) in snapshots.iter().enumerate() {
        let item = items.get(snapshot.visualization_id.as_str()).copied();
        let description = if snapshot.description.trim().is_empty() {
            "No description available".to_string()
        } else {
            escape_html(&snapshot.description)
        };
        sections.push_str(&format!(
            r#"
      <section class="chart" style="{style}">
        <h3>{title}</h3>
        <div class="canvas-box"><canvas id="chart-{index}"></canvas></div>
        <p class="meta"><strong>X Field:</strong> {x} &middot; <strong>Y Field:</strong> {y}</p>
        <p class="desc">{description}</p>
      </section>"#,
            style = grid_style(item),
            title = escape_html(&snapshot.title),
            index = index,
            x = escape_html(&snapshot.x_field),
            y = escape_html(&snapshot.y_field),
            description = description,
        ));
        configs.push(chart_config(snapshot));
    }

    let configs = script_json(&Value::Array(configs))?;

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>{title}</title>
    <script src="{chart_js}" onerror="window.chartsRenderError = 'Chart.js failed to load';"></script>
    <style>
      body {{ font-family: sans-serif; padding: 20px; margin: 0; background: white; }}
      h1 {{ font-size: 24px; margin-bottom: 10px; }}
      .grid {{ display: grid; grid-template-columns: repeat({columns}, 1fr); grid-auto-rows: {row_height}px; gap: 16px; }}
      .chart {{ display: flex; flex-direction: column; min-height: 0; border: 1px solid #e5e7eb; border-radius: 6px; padding: 12px; box-sizing: border-box; }}
      .chart h3 {{ margin: 0 0 8px; font-size: 16px; }}
      .canvas-box {{ position: relative; flex: 1; min-height: 0; }}
      .meta, .desc {{ margin: 6px 0 0; font-size: 12px; color: #4b5563; }}
    </style>
  </head>
  <body>
    <h1>{title}</h1>
    <p>{description}</p>
    <main class="grid">{sections}
    </main>
    <script>
      document.addEventListener('DOMContentLoaded', function () {{
        var configs = {configs};
        var remaining = configs.length;
        function fail(err) {{
          window.chartsRenderError = String((err && err.message) || err);
        }}
        if (remaining === 0) {{
          window.chartsRendered = true;
          return;
        }}
        if (typeof Chart === 'undefined') {{
          fail('Chart.js failed to load');
          return;
        }}
        configs.forEach(function (cfg, i) {{
          var resolved = false;
          function finish() {{
            if (resolved) return;
            resolved = true;
            remaining -= 1;
            if (remaining === 0) window.chartsRendered = true;
          }}
          cfg.options = cfg.options || {{}};
          cfg.options.animation = Object.assign({{}}, cfg.options.animation || {{}}, {{ onComplete: finish }});
          try {{
            new Chart(document.getElementById('chart-' + i), cfg);
          }} catch (e) {{
            fail(e);
          }}
        }});
      }});
    </script>
  </body>
</html>
"#,
        title = escape_html(title),
        description = escape_html(description),
        chart_js = CHART_JS_URL,
        columns = GRID_COLUMNS,
        row_height = ROW_HEIGHT_PX,
        sections = sections,
        configs = configs,
    ))
}
