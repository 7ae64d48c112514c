//! 热更新演示
//!
//! 使用内存连接器模拟 h1 -> h2 的配置切换：
//! 句柄在切换后立即落到新连接池，旧连接池在宽限期后关闭。

use rat_datastore::bson::doc;
use rat_datastore::config::keys;
use rat_datastore::{ConfigSnapshot, DatastoreRegistry, MemoryConnector};
use rat_logger::{LevelFilter, LoggerBuilder, handler::term::TermConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn snapshot(servers: &str) -> ConfigSnapshot {
    ConfigSnapshot::builder()
        .set(keys::MONGO_SERVERS, servers)
        .set(keys::MONGO_DB_NAME, "app")
        .set(keys::USERNAME, "svc")
        .set(keys::PASSWORD, "secret")
        .set(keys::TRUST_DB_NAME, "admin")
        .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    LoggerBuilder::new()
        .with_level(LevelFilter::Info)
        .add_terminal_with_config(TermConfig::default())
        .init()
        .expect("日志初始化失败");
    rat_datastore::init();

    println!("🚀 {} 热更新演示", rat_datastore::get_info());
    println!("========================\n");

    let connector = Arc::new(MemoryConnector::new());
    let registry = DatastoreRegistry::builder()
        .connector(connector.clone())
        .grace_period(Duration::from_secs(2))
        .app_name("hot_reload_demo")
        .build();

    let (tx, rx) = watch::channel(snapshot("mongodb://h1:27017"));
    let initial = rx.borrow().clone();
    registry.reload(initial).await?;
    let watcher = registry.watch_config(rx);

    let store = registry.default_datastore()?;
    let orders = store.with_suffix("orders", "2019").await?;
    println!("默认数据源: {}", store);
    println!("订单集合: {}", orders.collection_name("order"));

    orders.insert_one("order", doc! { "sku": "a-1", "qty": 3 }).await?;
    let old_pool = orders.current_pool();
    println!("当前目标: {}", old_pool.target());

    println!("\n📝 切换到 h2");
    tx.send(snapshot("mongodb://h2:27017"))?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("当前目标: {}", orders.current_pool().target());
    println!("h2 订单数: {}", orders.count("order", doc! {}).await?);
    println!(
        "旧连接池已关闭: {}, 待关闭: {}",
        old_pool.is_closed(),
        registry.pending_close()
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    println!(
        "宽限期后旧连接池已关闭: {}, 待关闭: {}",
        old_pool.is_closed(),
        registry.pending_close()
    );
    println!(
        "h1 上保留的订单数: {}",
        connector.server("h1:27017").database("orders").collection_len("order_2019")
    );

    println!("\n📊 注册表状态:");
    for (key, status) in registry.status() {
        println!("  {}: {}", key, serde_json::to_string_pretty(&status)?);
    }

    drop(tx);
    watcher.await?;
    registry.shutdown().await;
    println!("\n✅ 演示完成");
    Ok(())
}
