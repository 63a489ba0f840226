//! Tests for the filesystem storage account

use super::*;
use tempfile::TempDir;

fn ctx() -> RequestContext {
    RequestContext::default()
}

fn account(dir: &TempDir) -> FilesystemStorageAccount {
    FilesystemStorageAccount::new(dir.path(), "devstore", Some(b"local-key".to_vec()))
}

async fn ready_queue(account: &FilesystemStorageAccount) -> Arc<dyn QueueClient> {
    let queue = account.queue_client(&QueueName::new("orders").unwrap());
    queue.create_if_not_exists(&ctx()).await.unwrap();
    queue
}

async fn ready_container(account: &FilesystemStorageAccount) -> Arc<dyn BlobContainerClient> {
    let container = account.blob_container_client(&ContainerName::new("overflow").unwrap());
    container
        .create_if_not_exists(PublicAccess::Off, &ctx())
        .await
        .unwrap();
    container
}

// ============================================================================
// Queue Tests
// ============================================================================

#[tokio::test]
async fn test_create_writes_queue_file() {
    let dir = TempDir::new().unwrap();
    let account = account(&dir);
    let queue = account.queue_client(&QueueName::new("orders").unwrap());

    assert!(queue.create_if_not_exists(&ctx()).await.unwrap());
    assert!(!queue.create_if_not_exists(&ctx()).await.unwrap());
    assert!(dir.path().join("queues").join("orders.json").exists());
}

#[tokio::test]
async fn test_messages_survive_reopening_account() {
    let dir = TempDir::new().unwrap();
    {
        let queue = ready_queue(&account(&dir)).await;
        queue
            .add_message(Bytes::from("durable"), None, None, &ctx())
            .await
            .unwrap();
    }

    let reopened = account(&dir);
    let queue = reopened.queue_client(&QueueName::new("orders").unwrap());
    let message = queue.get_message(None, &ctx()).await.unwrap().unwrap();

    assert_eq!(message.body, Bytes::from("durable"));
    assert_eq!(message.dequeue_count, 1);
}

#[tokio::test]
async fn test_dequeue_state_is_persisted() {
    let dir = TempDir::new().unwrap();
    let queue = ready_queue(&account(&dir)).await;
    queue
        .add_message(Bytes::from("once"), None, None, &ctx())
        .await
        .unwrap();

    let message = queue.get_message(None, &ctx()).await.unwrap().unwrap();

    // A second process sees the message as invisible
    let other = account(&dir).queue_client(&QueueName::new("orders").unwrap());
    assert!(other.get_message(None, &ctx()).await.unwrap().is_none());

    other
        .delete_message(&message.id, message.pop_receipt.as_ref().unwrap(), &ctx())
        .await
        .unwrap();
    assert_eq!(
        queue
            .fetch_attributes(&ctx())
            .await
            .unwrap()
            .approximate_message_count,
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_accounts_sharing_a_root_do_not_lose_messages() {
    let dir = TempDir::new().unwrap();
    let first = ready_queue(&account(&dir)).await;
    let second = account(&dir).queue_client(&QueueName::new("orders").unwrap());

    let mut sends = Vec::new();
    for i in 0..40 {
        let queue = if i % 2 == 0 {
            Arc::clone(&first)
        } else {
            Arc::clone(&second)
        };
        sends.push(tokio::spawn(async move {
            queue
                .add_message(Bytes::from(format!("message-{}", i)), None, None, &ctx())
                .await
                .unwrap();
        }));
    }
    for send in sends {
        send.await.unwrap();
    }

    let attributes = first.fetch_attributes(&ctx()).await.unwrap();
    assert_eq!(attributes.approximate_message_count, 40);
    assert!(dir.path().join("account.lock").exists());
}

#[tokio::test]
async fn test_peek_does_not_consume() {
    let dir = TempDir::new().unwrap();
    let queue = ready_queue(&account(&dir)).await;
    queue
        .add_message(Bytes::from("look"), None, None, &ctx())
        .await
        .unwrap();

    let peeked = queue.peek_messages(5, &ctx()).await.unwrap();
    assert_eq!(peeked.len(), 1);
    assert!(queue.get_message(None, &ctx()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_queue_is_not_found() {
    let dir = TempDir::new().unwrap();
    let queue = account(&dir).queue_client(&QueueName::new("missing").unwrap());

    assert!(!queue.exists(&ctx()).await.unwrap());
    assert!(matches!(
        queue.get_message(None, &ctx()).await,
        Err(QueueError::QueueNotFound { .. })
    ));
}

#[tokio::test]
async fn test_delete_if_exists() {
    let dir = TempDir::new().unwrap();
    let queue = ready_queue(&account(&dir)).await;

    assert!(queue.delete_if_exists(&ctx()).await.unwrap());
    assert!(!queue.delete_if_exists(&ctx()).await.unwrap());
    assert!(!queue.exists(&ctx()).await.unwrap());
}

#[tokio::test]
async fn test_clear_removes_messages() {
    let dir = TempDir::new().unwrap();
    let queue = ready_queue(&account(&dir)).await;
    for body in ["a", "b"] {
        queue
            .add_message(Bytes::from(body), None, None, &ctx())
            .await
            .unwrap();
    }

    queue.clear(&ctx()).await.unwrap();
    assert!(queue.peek_message(&ctx()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_signature_uses_account_key() {
    let dir = TempDir::new().unwrap();
    let account = account(&dir);
    let queue = ready_queue(&account).await;

    let policy = SharedAccessPolicy {
        permissions: crate::queue_client::QueueAccessRights::parse("a").unwrap(),
        starts_at: None,
        expires_at: Some(Timestamp::now().offset(Duration::minutes(5))),
    };
    let token = queue.shared_access_signature(&policy, None).unwrap();
    assert!(account.verify_signature(queue.name(), &token));
}

// ============================================================================
// Blob Tests
// ============================================================================

#[tokio::test]
async fn test_blob_round_trip() {
    let dir = TempDir::new().unwrap();
    let container = ready_container(&account(&dir)).await;
    let name = BlobName::generate();
    let data = Bytes::from(vec![7u8; 100_000]);

    container.upload(&name, data.clone(), &ctx()).await.unwrap();

    assert!(container.exists(&name, &ctx()).await.unwrap());
    assert_eq!(container.download(&name, &ctx()).await.unwrap(), data);
    assert_eq!(container.list(&ctx()).await.unwrap(), vec![name]);
}

#[tokio::test]
async fn test_blob_delete_missing_is_not_found() {
    let dir = TempDir::new().unwrap();
    let container = ready_container(&account(&dir)).await;

    assert!(matches!(
        container.delete(&BlobName::generate(), &ctx()).await,
        Err(BlobError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_blob_calls_require_container() {
    let dir = TempDir::new().unwrap();
    let container = account(&dir).blob_container_client(&ContainerName::new("absent").unwrap());

    assert!(matches!(
        container
            .upload(&BlobName::generate(), Bytes::from("x"), &ctx())
            .await,
        Err(BlobError::ContainerNotFound { .. })
    ));
}

#[tokio::test]
async fn test_tampered_blob_fails_checksum() {
    let dir = TempDir::new().unwrap();
    let container = ready_container(&account(&dir)).await;
    let name = BlobName::new("tampered").unwrap();
    container
        .upload(&name, Bytes::from("original"), &ctx())
        .await
        .unwrap();

    let path = dir.path().join("blobs").join("overflow").join("tampered");
    let mut record: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    record["data"] = serde_json::Value::String(BASE64.encode(b"modified"));
    std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

    assert!(matches!(
        container.download(&name, &ctx()).await,
        Err(BlobError::ChecksumMismatch { .. })
    ));
}

#[tokio::test]
async fn test_no_staging_files_left_behind() {
    let dir = TempDir::new().unwrap();
    let container = ready_container(&account(&dir)).await;
    container
        .upload(&BlobName::generate(), Bytes::from("x"), &ctx())
        .await
        .unwrap();

    let leftovers = std::fs::read_dir(dir.path().join("tmp")).unwrap().count();
    assert_eq!(leftovers, 0);
}
