//! consul-template - registry-driven template rendering daemon.
//!
//! Flag parsing and exit-code propagation live in [`consul_template::cli`].

use consul_template::cli::App;

#[tokio::main]
async fn main() {
    let code = App::new().run(std::env::args().collect()).await;
    std::process::exit(code);
}
