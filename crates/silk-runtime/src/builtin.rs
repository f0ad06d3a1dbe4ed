//! Built-in routes every runtime carries.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::router::Router;
use crate::runtime::AppInfo;

pub(crate) fn register(router: &mut Router, app_info: &AppInfo) {
    router.register("silk:ping", Arc::new(|_, _| Ok(Value::from("pong"))), None);

    let info = json!({
        "name": app_info.name,
        "version": app_info.version,
    });
    router.register(
        "silk:appInfo",
        Arc::new(move |_, _| Ok(info.clone())),
        None,
    );
}
