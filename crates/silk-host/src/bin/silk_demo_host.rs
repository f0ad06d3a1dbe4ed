//! Demo handler host used by the bridge integration tests: `ts:echo`
//! returns its arguments, `ts:fail` always errors.

use silk_host::HostApp;

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    let mut app = HostApp::new();
    app.register("ts:echo", Ok);
    app.register("ts:fail", |_| {
        Err("MissingText: text argument is required".to_string())
    });
    app.run().await
}
