// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Concurrent calls for the same key share a single producer run.

use std::convert::Infallible;
use std::time::Duration;

use cachedupe::{Cache, DefineOptions};
use tick::Clock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cache = Cache::builder(Clock::new_tokio())
        .ttl(Duration::from_secs(60))
        .on_dedupe(|key| println!("joined the call in flight for {key}"))
        .on_hit(|key| println!("served {key} from storage"))
        .on_miss(|key| println!("computing {key}"))
        .build();

    let double = cache.define("double", DefineOptions::new(), |x: u64, _key| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, Infallible>(x * 2)
    })?;

    let (a, b, c) = tokio::join!(double.call(5), double.call(5), double.call(7));
    println!("results: {}, {}, {}", a?, b?, c?);

    // Stored for a minute, so this is a hit.
    println!("again: {}", double.call(5).await?);

    Ok(())
}
