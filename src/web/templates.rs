use minijinja::value::Value;
use minijinja::Environment;
use serde::Serialize;
use tracing::error;

pub fn init_templates() -> Environment<'static> {
    let mut env = Environment::new();

    // Register built-in templates
    env.add_template("index.html", include_str!("../../templates/index.html"))
        .expect("Failed to add index template");
    env.add_template("error.html", include_str!("../../templates/error.html"))
        .expect("Failed to add error template");

    // Add filters
    // Output goes into <script> blocks, so it is marked safe
    env.add_filter("json", |value: Value| {
        Value::from_safe_string(serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string()))
    });

    env
}

pub fn render_template<S: Serialize>(env: &Environment, template_name: &str, context: S) -> String {
    match env.get_template(template_name) {
        Ok(tmpl) => match tmpl.render(context) {
            Ok(result) => result,
            Err(e) => {
                error!("Template render error: {}", e);
                format!("<h1>Template Error</h1><p>{}</p>", e)
            }
        },
        Err(e) => {
            error!("Template not found: {} ({})", template_name, e);
            format!("<h1>Template Not Found</h1><p>{}: {}</p>", template_name, e)
        }
    }
}
