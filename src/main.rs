use std::net::IpAddr;
use std::rc::Rc;

use reactor_httpd::config::Config;
use reactor_httpd::http::HttpServer;
use reactor_httpd::listener::{StreamOptions, TcpListener};
use reactor_httpd::reactor::Reactor;

fn main() -> reactor_httpd::error::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::from_file(&config_path)?;

    let reactor = Reactor::new()?;
    let stream_opts =
        StreamOptions { max_buffer_size: config.max_buffer_size, read_chunk_size: config.read_chunk_size };
    let listener = TcpListener::new(reactor.clone(), stream_opts);

    let server = HttpServer::new(listener.clone(), config.no_keep_alive, config.xheaders, config.max_buffer_size, handle_request);

    for addr in &config.listen {
        let host: IpAddr = addr
            .host
            .parse()
            .map_err(|_| reactor_httpd::error::ServerError::AddressResolution(addr.host.clone()))?;
        listener.bind(host, addr.port, config.backlog)?;
        proxy_log::info!("listening on {}:{}", addr.host, addr.port);
    }
    server.start()?;

    reactor.run()?;
    Ok(())
}

fn handle_request(request: Rc<reactor_httpd::http::Request>) {
    let body = format!("{} {}\n", request.method, request.path);
    let headers = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
        body.len()
    );
    request.write(headers.into_bytes(), None);
    request.write(body.into_bytes(), None);
    request.finish();
}
