//! Priority dispatch demo
//!
//! Several producer threads submit jobs with different urgency levels into a
//! priority block. A bounded worker queue sits downstream; the block holds
//! back lower-priority jobs whenever the queue is full.
//!
//! Usage: RUST_LOG=priority_pipeline=debug cargo run --example priority_dispatch

use priority_pipeline::{
    Block, BufferStage, OverflowPolicy, PriorityBlock, PriorityBlockBuilder,
    Result as PipelineResult, Source, Target,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Job {
    producer: usize,
    id: usize,
    urgency: i32,
}

fn main() -> PipelineResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dispatcher: PriorityBlock<Job> = PriorityBlockBuilder::new()
        .name("dispatcher")
        .propagate_on_accept(true)
        .build()?;
    let queue = Arc::new(BufferStage::new(4, OverflowPolicy::Decline));
    dispatcher.link(queue.clone()).forget();

    let producers: Vec<_> = (0..3)
        .map(|producer| {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                for id in 0..10 {
                    let urgency = ((producer + id) % 3) as i32;
                    let job = Job {
                        producer,
                        id,
                        urgency,
                    };
                    if !dispatcher.post((urgency, job)) {
                        eprintln!("producer {} could not submit job {}", producer, id);
                    }
                    thread::sleep(Duration::from_millis(2));
                }
            })
        })
        .collect();

    let worker = {
        let dispatcher = dispatcher.clone();
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut handled = 0;
            while !queue.completion().is_completed() {
                match queue.receive() {
                    Some(job) => {
                        handled += 1;
                        println!(
                            "worker: job {:>2} from producer {} (urgency {})",
                            job.id, job.producer, job.urgency
                        );
                        thread::sleep(Duration::from_millis(5));
                    }
                    None => thread::sleep(Duration::from_millis(1)),
                }
                // Room was made downstream; let held-back jobs through.
                dispatcher.flush();
            }
            handled
        })
    };

    for producer in producers {
        producer.join().expect("producer thread panicked");
    }
    dispatcher.complete();
    dispatcher.completion().wait()?;

    let handled = worker.join().expect("worker thread panicked");
    println!("\nHandled {} jobs", handled);
    println!("{}", dispatcher.metrics().snapshot().format());
    Ok(())
}
