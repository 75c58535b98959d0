//! HTTP `CONNECT` tunnelling.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ProxyConfig;
use crate::error::{NetworkError, Result};

/// Upper bound on the proxy's response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Open a TCP connection to the proxy and ask it to tunnel to
/// `target_host:target_port`.
pub(crate) async fn connect_via_proxy(
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream> {
    let proxy_url = proxy.parsed_url()?;
    let proxy_host = proxy_url
        .host_str()
        .ok_or_else(|| NetworkError::InvalidConfig("proxy URL has no host".into()))?;
    let proxy_port = proxy_url.port_or_known_default().unwrap_or(80);

    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(|e| NetworkError::Proxy(format!("cannot reach {proxy_host}:{proxy_port}: {e}")))?;

    establish_tunnel(&mut stream, proxy, target_host, target_port).await?;
    Ok(stream)
}

/// Write the `CONNECT` request and consume the response head.
pub(crate) async fn establish_tunnel<S>(
    stream: &mut S,
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = format!("{target_host}:{target_port}");
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(auth) = proxy.authorization() {
        request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| NetworkError::Proxy(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| NetworkError::Proxy(e.to_string()))?;

    let head = read_response_head(stream).await?;
    let status = parse_status(&head)?;
    if !(200..300).contains(&status) {
        return Err(NetworkError::Proxy(format!(
            "proxy refused tunnel to {authority} with status {status}"
        )));
    }
    tracing::debug!(
        target: horizon_relay_core::logging::targets::TRANSPORT,
        %authority,
        "proxy tunnel established"
    );
    Ok(())
}

/// Read byte by byte up to the blank line so no tunnelled data is consumed.
async fn read_response_head<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(NetworkError::Proxy("response head too large".into()));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| NetworkError::Proxy(e.to_string()))?;
        if n == 0 {
            return Err(NetworkError::Proxy(
                "proxy closed the connection during CONNECT".into(),
            ));
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).map_err(|_| NetworkError::Proxy("response head is not UTF-8".into()))
}

fn parse_status(head: &str) -> Result<u16> {
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
            .parse()
            .map_err(|_| NetworkError::Proxy(format!("malformed status line '{status_line}'"))),
        _ => Err(NetworkError::Proxy(format!(
            "malformed status line '{status_line}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(
            parse_status("HTTP/1.1 200 Connection established\r\n\r\n").unwrap(),
            200
        );
        assert_eq!(parse_status("HTTP/1.0 407 Auth\r\n\r\n").unwrap(), 407);
        assert!(parse_status("SSH-2.0-OpenSSH\r\n\r\n").is_err());
    }

    #[tokio::test]
    async fn test_tunnel_request_and_success() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let proxy = ProxyConfig::new("http://proxy.local:3128").basic_auth("user", "pass");

        let server_task = tokio::spawn(async move {
            let mut received = Vec::new();
            let mut buf = [0u8; 256];
            while !received.ends_with(b"\r\n\r\n") {
                let n = server.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
            }
            server
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\nrest")
                .await
                .unwrap();
            String::from_utf8(received).unwrap()
        });

        establish_tunnel(&mut client, &proxy, "relay.example.com", 443)
            .await
            .unwrap();
        let request = server_task.await.unwrap();
        assert!(request.starts_with("CONNECT relay.example.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));

        let mut rest = [0u8; 4];
        client.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"rest");
    }

    #[tokio::test]
    async fn test_tunnel_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let proxy = ProxyConfig::new("http://proxy.local:3128");

        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let _ = server.read(&mut buf).await;
            let _ = server
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await;
        });

        let err = establish_tunnel(&mut client, &proxy, "relay.example.com", 443)
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Proxy(msg) if msg.contains("407")));
    }
}
