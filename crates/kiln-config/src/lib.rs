//! Kiln Config
//!
//! Serializable pipeline definitions. These describe a pipeline before its
//! task kinds are looked up and its artifact references parsed; the resolver
//! turns them into a runnable pipeline.
//!
//! ```json
//! {
//!   "name": "site",
//!   "cache": { "type": "local", "path": ".kiln/cache" },
//!   "tasks": [
//!     {
//!       "task": "command",
//!       "name": "render",
//!       "output": { "artifact": "site:1.0:dir" },
//!       "options": { "program": "make", "args": ["html", "OUT={output}"] }
//!     },
//!     {
//!       "task": "create-archive",
//!       "input": { "artifact": "site:1.0:dir" },
//!       "output": { "path": "dist/site.tar.gz" }
//!     }
//!   ]
//! }
//! ```

mod binding;
mod cache;
mod pipeline;
mod task;

pub use binding::BindingDef;
pub use cache::CacheDef;
pub use pipeline::PipelineDef;
pub use task::TaskDef;
