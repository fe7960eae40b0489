//! Static HTML report for the aggregate artifact.
//!
//! Renders one collapsible card per analyzed file: service badges, evidence
//! blocks, per-record reasoning, and the model's full reasoning trace. A
//! sidebar lists unique service names with occurrence counts; search and
//! sidebar filtering run client-side so the page stays a single file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::model::Annotation;
use crate::util;

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Data Sink Services</title>
    <style>
        html, body { margin: 0; padding: 0; height: 100%; font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; background-color: #f8f9fa; }
        body { display: flex; overflow-x: hidden; }
        .sidebar { width: 250px; min-width: 250px; background-color: #343a40; color: white; padding: 20px; height: 100vh; position: fixed; left: 0; top: 0; overflow-y: auto; }
        .sidebar-title { font-size: 1.2rem; margin-bottom: 15px; padding-bottom: 10px; border-bottom: 1px solid rgba(255,255,255,0.2); }
        .sidebar-service { display: flex; align-items: center; margin-bottom: 10px; cursor: pointer; padding: 5px; border-radius: 5px; }
        .sidebar-service:hover { background-color: rgba(255,255,255,0.1); }
        .service-count { font-size: 1.2rem; font-weight: bold; margin-right: 10px; }
        .main-content { margin-left: 250px; padding: 20px; width: calc(100% - 290px); }
        .card { margin-bottom: 20px; border-radius: 8px; background: white; box-shadow: 0 4px 6px rgba(0, 0, 0, 0.1); }
        .card-header { background-color: #f1f8ff; font-weight: bold; border-bottom: 1px solid #dee2e6; cursor: pointer; display: flex; justify-content: space-between; align-items: center; padding: 12px 16px; }
        .card-body { padding: 16px; }
        .file-path { color: #6c757d; font-size: 0.9rem; }
        .service-badge { background-color: #0d6efd; color: white; padding: 5px 10px; border-radius: 20px; margin: 5px 0; display: inline-block; }
        .evidence-block { background-color: #f8f9fa; padding: 15px; border-radius: 5px; border-left: 4px solid #6c757d; font-family: monospace; white-space: pre-wrap; margin: 10px 0; }
        .reasoning-block { background-color: #fff3cd; padding: 15px; border-radius: 5px; margin: 10px 0; }
        .reasoning-content { display: none; white-space: pre-wrap; }
        #search-input { width: 100%; box-sizing: border-box; padding: 10px; margin-bottom: 20px; border: 1px solid #dee2e6; border-radius: 5px; }
        .generated-at { color: #6c757d; font-size: 0.8rem; text-align: center; margin-top: 30px; }
    </style>
</head>
<body>
    <div class="sidebar">
        <div class="sidebar-title">Unique Services</div>
        <div id="unique-services-list"></div>
    </div>
    <div class="main-content">
        <h1>Data Sink Services</h1>
        <input type="text" id="search-input" placeholder="Search for files, services, or keywords...">
        <div id="file-cards">
"#;

const PAGE_SCRIPT: &str = r#"        </div>
        <div class="generated-at">Generated GENERATED_AT</div>
    </div>
    <script>
        function toggleCard(header) {
            const body = header.nextElementSibling;
            body.style.display = body.style.display === 'none' ? 'block' : 'none';
        }
        function toggleReasoning(header) {
            const content = header.nextElementSibling;
            content.style.display = content.style.display === 'none' ? 'block' : 'none';
        }
        function filterCards(searchTerm, exactMatch = false) {
            searchTerm = searchTerm.toLowerCase();
            document.querySelectorAll('.file-card').forEach(card => {
                if (exactMatch) {
                    let hasMatch = false;
                    card.querySelectorAll('.service-item').forEach(item => {
                        if (item.getAttribute('data-service').toLowerCase() === searchTerm) {
                            hasMatch = true;
                        }
                    });
                    card.style.display = hasMatch ? 'block' : 'none';
                } else {
                    const cardText = card.textContent.toLowerCase();
                    card.style.display = cardText.includes(searchTerm) ? 'block' : 'none';
                }
            });
        }
        function filterByService(serviceName) {
            document.getElementById('search-input').value = serviceName;
            filterCards(serviceName, true);
        }
        document.getElementById('search-input').addEventListener('input', function () {
            filterCards(this.value, false);
        });

        const servicesData = {};
        document.querySelectorAll('.service-item').forEach(item => {
            const service = item.getAttribute('data-service');
            if (service) {
                servicesData[service] = (servicesData[service] || 0) + 1;
            }
        });
        let sidebarHTML = '';
        for (const [service, count] of Object.entries(servicesData)) {
            sidebarHTML += `
                <div class="sidebar-service" onclick="filterByService('${service.replace(/'/g, "\\'")}')">
                    <span class="service-count">${count}</span>
                    <div class="service-badge">${service}</div>
                </div>`;
        }
        document.getElementById('unique-services-list').innerHTML = sidebarHTML;
    </script>
</body>
</html>
"#;

/// Escape text for interpolation into HTML element content and attributes.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn render_card(annotation: &Annotation) -> String {
    let mut card = String::new();
    card.push_str(&format!(
        r#"            <div class="card file-card">
                <div class="card-header" onclick="toggleCard(this)">
                    <div class="file-path">{}</div>
                    <span>&#9660;</span>
                </div>
                <div class="card-body">
                    <h5>Detected Services:</h5>
"#,
        escape_html(&annotation.filename)
    ));

    for record in &annotation.message.detected_data_sink_services {
        card.push_str(&format!(
            r#"                    <div class="service-entry">
                        <div class="service-badge service-item" data-service="{service}">{service}</div>
                        <div class="evidence-block">{evidence}</div>
                        <div class="reasoning-block"><strong>Reasoning:</strong> {reasoning}</div>
                    </div>
"#,
            service = escape_html(&record.service),
            evidence = escape_html(&record.evidence),
            reasoning = escape_html(&record.reasoning),
        ));
    }

    card.push_str(&format!(
        r#"                    <div onclick="toggleReasoning(this)" style="cursor: pointer;">
                        <h5>Model Reasoning Trace &#9660;</h5>
                    </div>
                    <div class="reasoning-content">{}</div>
                </div>
            </div>
"#,
        escape_html(&annotation.reasoning)
    ));
    card
}

/// Occurrence count per service name across all annotations, sorted by name.
fn service_counts(annotations: &[Annotation]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for annotation in annotations {
        for record in &annotation.message.detected_data_sink_services {
            *counts.entry(record.service.as_str()).or_insert(0) += 1;
        }
    }
    counts
}

/// Render the full report page.
pub fn render(annotations: &[Annotation], generated_at: &str) -> String {
    let mut page = String::from(PAGE_HEAD);
    for annotation in annotations {
        page.push_str(&render_card(annotation));
    }
    page.push_str(&PAGE_SCRIPT.replace("GENERATED_AT", &escape_html(generated_at)));
    page
}

/// Read the aggregate artifact, write the HTML report, print the service
/// tally. Returns the output path.
pub fn run(input: &Path, output: Option<&Path>) -> anyhow::Result<PathBuf> {
    let content = fs::read_to_string(input)
        .with_context(|| format!("Failed to read aggregate artifact {}", input.display()))?;
    let annotations: Vec<Annotation> = serde_json::from_str(&content).with_context(|| {
        format!(
            "Aggregate artifact {} is not an array of annotations",
            input.display()
        )
    })?;

    let counts = service_counts(&annotations);
    println!("\nService Counts:");
    println!("{}", "-".repeat(40));
    let mut total = 0;
    for (service, count) in &counts {
        println!("{}: {}", service, count);
        total += count;
    }
    println!("{}", "-".repeat(40));
    println!("Total services detected: {}", total);
    println!("Unique services found: {}\n", counts.len());

    let generated_at = chrono::Utc::now().to_rfc3339();
    let page = render(&annotations, &generated_at);

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => input.parent().unwrap_or(Path::new(".")).join("index.html"),
    };
    util::write_atomic(&output, &page)?;
    println!("HTML visualization created at: {}", output.display());
    Ok(output)
}
