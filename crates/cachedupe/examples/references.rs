// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tagging stored values with references and invalidating them as a group.

use std::convert::Infallible;
use std::time::Duration;

use cachedupe::{Cache, DefineOptions, MemoryStorage};
use serde::{Deserialize, Serialize};
use tick::Clock;

#[derive(Clone, Serialize, Deserialize)]
struct Post {
    id: u64,
    author: u64,
    title: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let clock = Clock::new_tokio();
    let storage = MemoryStorage::builder(clock.clone()).capacity(256).name("posts").build();
    let cache = Cache::builder(clock).ttl(Duration::from_secs(300)).storage(storage.clone()).build();

    let post = cache.define(
        "post",
        DefineOptions::new().references(|_id: u64, _key, post: Post| async move {
            vec![format!("post:{}", post.id), format!("author:{}", post.author)]
        }),
        |id: u64, _key| async move {
            println!("loading post {id}");
            Ok::<_, Infallible>(Post {
                id,
                author: id % 2,
                title: format!("Post #{id}"),
            })
        },
    )?;

    for id in 1..=4 {
        post.call(id).await?;
    }
    println!("posts by author 1: {:?}", storage.keys_for_reference("author:1"));

    let removed = cache.invalidate_all(&["author:1".to_string()]).await;
    println!("invalidated {removed:?}");

    // Posts 1 and 3 are loaded again, 2 and 4 are still stored.
    for id in 1..=4 {
        let loaded = post.call(id).await?;
        println!("{} by {}", loaded.title, loaded.author);
    }

    Ok(())
}
