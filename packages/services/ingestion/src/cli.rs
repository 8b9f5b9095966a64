pub fn print_ingestion_usage() {
    println!("ingestion-service ROLE");
    println!();
    println!("Roles:");
    println!("  router          consume raw object-store events and fan out by size tier");
    println!("  worker TIER     run a storage worker bound to one tier consumer");
    println!("                  TIER is one of: small | medium | large");
    println!();
    println!("Key environment variables:");
    println!("  NATS_URL                 message bus (default nats://localhost:4222)");
    println!("  DATABASE_URL             Postgres REM store");
    println!("  GRAPH_URI                bolt endpoint for the graph namespace");
    println!("  REDIS_URL                KV namespace");
    println!("  EMBEDDINGS_SERVICE_URL   embedding service");
    println!("  AWS_S3_ENDPOINT          object store endpoint (MinIO compatible)");
    println!("  MAX_CHUNK_TOKENS         per-chunk token cap (default 25000)");
}
